//! Shader-table layout calculation and record writing.
//!
//! A shader-table record is the group identifier followed by the record's
//! inline root arguments: root-constant bytes, then per shader argument
//! the CBV's device address and an 8-byte reserved slot (the descriptor
//! table cannot be addressed inline on this API and is bound through the
//! pipeline instead). Record strides are rounded to the group-handle
//! alignment, section sizes to the base alignment.

use arclight_hal::align_up;
use arclight_hal::arg::{ShaderTableRecord, ShaderTableTarget};
use arclight_hal::types::ShaderTableStrides;

use crate::pools::resource::ResourcePool;

/// Alignment rules queried from the raytracing pipeline properties.
#[derive(Copy, Clone, Debug)]
pub struct ShaderTableProperties {
    pub handle_size: u32,
    pub handle_alignment: u32,
    pub base_alignment: u32,
}

impl Default for ShaderTableProperties {
    fn default() -> Self {
        // the values every current KHR implementation reports
        ShaderTableProperties {
            handle_size: 32,
            handle_alignment: 32,
            base_alignment: 64,
        }
    }
}

fn record_arg_bytes(record: &ShaderTableRecord<'_>) -> u32 {
    record.root_arg_data.len() as u32 + record.shader_arguments.len() as u32 * 16
}

fn section_stride(props: &ShaderTableProperties, records: &[ShaderTableRecord<'_>]) -> u32 {
    let max_args = records.iter().map(record_arg_bytes).max().unwrap_or(0);
    align_up(
        u64::from(props.handle_size + max_args),
        u64::from(props.handle_alignment),
    ) as u32
}

/// Sizes and strides of the four table sections for the given records.
pub fn calculate_strides(
    props: &ShaderTableProperties,
    ray_gen: &ShaderTableRecord<'_>,
    miss_records: &[ShaderTableRecord<'_>],
    hit_group_records: &[ShaderTableRecord<'_>],
    callable_records: &[ShaderTableRecord<'_>],
) -> ShaderTableStrides {
    let base = u64::from(props.base_alignment);

    let ray_gen_stride = section_stride(props, std::slice::from_ref(ray_gen));
    let stride_miss = section_stride(props, miss_records);
    let stride_hit_group = section_stride(props, hit_group_records);
    let stride_callable = section_stride(props, callable_records);

    ShaderTableStrides {
        // ray generation: exactly one record, stride == size
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

/// Writes one table section: per record the group identifier (selected by
/// its target) followed by its inline root arguments.
///
/// `group_handles` is the flat identifier array of the whole pipeline;
/// identifiable shaders occupy group indices [0, num_identifiable), hit
/// groups follow.
pub fn write_records(
    dest: &mut [u8],
    resources: &ResourcePool,
    group_handles: &[u8],
    num_identifiable_groups: u32,
    handle_size: u32,
    stride: u32,
    records: &[ShaderTableRecord<'_>],
) {
    let handle_size = handle_size as usize;
    for (i, record) in records.iter().enumerate() {
        let group_index = match record.target {
            ShaderTableTarget::IdentifiableShader(index) => index,
            ShaderTableTarget::HitGroup(index) => num_identifiable_groups + index,
        } as usize;

        let record_offset = i * stride as usize;
        let record_dest = &mut dest[record_offset..record_offset + stride as usize];
        record_dest[..handle_size].copy_from_slice(
            &group_handles[group_index * handle_size..(group_index + 1) * handle_size],
        );

        let mut cursor = handle_size;
        record_dest[cursor..cursor + record.root_arg_data.len()]
            .copy_from_slice(record.root_arg_data);
        cursor += record.root_arg_data.len();

        for arg in &record.shader_arguments {
            let address = if arg.constant_buffer.is_valid() {
                resources.buffer_device_address(arg.constant_buffer)
                    + u64::from(arg.constant_buffer_offset)
            } else {
                0
            };
            record_dest[cursor..cursor + 8].copy_from_slice(&address.to_le_bytes());
            record_dest[cursor + 8..cursor + 16].copy_from_slice(&0u64.to_le_bytes());
            cursor += 16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn bare_records_collapse_to_handle_stride() {
        let props = ShaderTableProperties::default();
        let ray_gen = record(&[], 0);
        let miss = [record(&[], 0), record(&[], 0)];
        let strides = calculate_strides(&props, &ray_gen, &miss, &[], &[]);

        assert_eq!(strides.size_ray_gen, 64);
        assert_eq!(strides.stride_miss, 32);
        assert_eq!(strides.size_miss, 64);
        assert_eq!(strides.size_hit_group, 0);
        assert_eq!(strides.stride_callable, 32);
        assert_eq!(strides.size_callable, 0);
    }

    #[test]
    fn largest_record_dictates_the_section_stride() {
        let props = ShaderTableProperties::default();
        let ray_gen = record(&[], 0);
        // 32 handle + 4 root bytes + 2*16 arg bytes = 68 -> 96
        let hit = [record(&[], 0), record(&[1, 2, 3, 4], 2)];
        let strides = calculate_strides(&props, &ray_gen, &[], &hit, &[]);

        assert_eq!(strides.stride_hit_group, 96);
        assert_eq!(strides.size_hit_group, 192);
    }

    #[test]
    fn stride_stays_handle_aligned() {
        let props = ShaderTableProperties {
            handle_size: 32,
            handle_alignment: 64,
            base_alignment: 64,
        };
        let ray_gen = record(&[0; 4], 0);
        let strides = calculate_strides(&props, &ray_gen, &[], &[], &[]);
        assert_eq!(strides.size_ray_gen % 64, 0);
    }
}
