//! Shader-table layout calculation and record writing (DXR).
//!
//! Record layout: the 32-byte shader identifier, then the record's inline
//! root arguments (root-constant bytes, then per shader argument the CBV
//! GPU address and the SRV/UAV descriptor-table GPU handle, 8 bytes
//! each). Strides round to the shader-record alignment, section sizes to
//! the table alignment.

use windows::Win32::Graphics::Direct3D12;

use arclight_hal::align_up;
use arclight_hal::arg::ShaderTableRecord;
use arclight_hal::handle;
use arclight_hal::types::ShaderTableStrides;

use crate::pools::pipeline::PipelinePool;
use crate::pools::resource::ResourcePool;
use crate::pools::shader_view::ShaderViewPool;

pub const IDENTIFIER_SIZE: u32 = Direct3D12::D3D12_SHADER_IDENTIFIER_SIZE_IN_BYTES;
pub const RECORD_ALIGNMENT: u32 = Direct3D12::D3D12_RAYTRACING_SHADER_RECORD_BYTE_ALIGNMENT;
pub const TABLE_ALIGNMENT: u32 = Direct3D12::D3D12_RAYTRACING_SHADER_TABLE_BYTE_ALIGNMENT;

fn record_arg_bytes(record: &ShaderTableRecord<'_>) -> u32 {
    record.root_arg_data.len() as u32 + record.shader_arguments.len() as u32 * 16
}

fn section_stride(records: &[ShaderTableRecord<'_>]) -> u32 {
    let max_args = records.iter().map(record_arg_bytes).max().unwrap_or(0);
    align_up(u64::from(IDENTIFIER_SIZE + max_args), u64::from(RECORD_ALIGNMENT)) as u32
}

pub fn calculate_strides(
    ray_gen: &ShaderTableRecord<'_>,
    miss_records: &[ShaderTableRecord<'_>],
    hit_group_records: &[ShaderTableRecord<'_>],
    callable_records: &[ShaderTableRecord<'_>],
) -> ShaderTableStrides {
    let base = u64::from(TABLE_ALIGNMENT);
    let ray_gen_stride = section_stride(std::slice::from_ref(ray_gen));
    let stride_miss = section_stride(miss_records);
    let stride_hit_group = section_stride(hit_group_records);
    let stride_callable = section_stride(callable_records);

    ShaderTableStrides {
        size_ray_gen: align_up(u64::from(ray_gen_stride), base) as u32,
        size_miss: align_up(u64::from(stride_miss) * miss_records.len() as u64, base) as u32,
        stride_miss,
        size_hit_group: align_up(
            u64::from(stride_hit_group) * hit_group_records.len() as u64,
            base,
        ) as u32,
        stride_hit_group,
        size_callable: align_up(
            u64::from(stride_callable) * callable_records.len() as u64,
            base,
        ) as u32,
        stride_callable,
    }
}

pub fn write_records(
    dest: &mut [u8],
    resources: &ResourcePool,
    shader_views: &ShaderViewPool,
    pipelines: &PipelinePool,
    pso: handle::PipelineState,
    stride: u32,
    records: &[ShaderTableRecord<'_>],
) {
    for (i, record) in records.iter().enumerate() {
        let identifier = pipelines.shader_identifier(pso, record.target);

        let record_offset = i * stride as usize;
        let record_dest = &mut dest[record_offset..record_offset + stride as usize];
        record_dest[..identifier.len()].copy_from_slice(&identifier);

        let mut cursor = identifier.len();
        record_dest[cursor..cursor + record.root_arg_data.len()]
            .copy_from_slice(record.root_arg_data);
        cursor += record.root_arg_data.len();

        for arg in &record.shader_arguments {
            let address = if arg.constant_buffer.is_valid() {
                resources.gpu_address(arg.constant_buffer) + u64::from(arg.constant_buffer_offset)
            } else {
                0
            };
            record_dest[cursor..cursor + 8].copy_from_slice(&address.to_le_bytes());
            let table = if arg.shader_view.is_valid() {
                shader_views.srv_uav_table(arg.shader_view).ptr
            } else {
                0
            };
            record_dest[cursor + 8..cursor + 16].copy_from_slice(&table.to_le_bytes());
            cursor += 16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_hal::arg::ShaderTableTarget;
    use arclight_hal::types::ShaderArgument;
    use arrayvec::ArrayVec;

    fn record(root_bytes: &'static [u8], num_args: usize) -> ShaderTableRecord<'static> {
        let mut shader_arguments = ArrayVec::new();
        for _ in 0..num_args {
            shader_arguments.push(ShaderArgument::default());
        }
        ShaderTableRecord {
            target: ShaderTableTarget::IdentifiableShader(0),
            root_arg_data: root_bytes,
            shader_arguments,
        }
    }

    #[test]
    fn strides_follow_dxr_alignments() {
        let ray_gen = record(&[], 0);
        let hit = [record(&[], 0), record(&[1, 2, 3, 4], 2)];
        let strides = calculate_strides(&ray_gen, &[], &hit, &[]);

        // 32 identifier + 4 + 32 arg bytes = 68 -> 96
        assert_eq!(strides.stride_hit_group, 96);
        assert_eq!(strides.size_hit_group % TABLE_ALIGNMENT, 0);
        assert_eq!(strides.size_ray_gen, 64);
    }
}
