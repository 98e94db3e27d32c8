//! Encoding and decoding of command streams.
//!
//! A stream is a tight sequence of `[tag: u8][record bytes]` pairs in a
//! caller-provided buffer; no padding is inserted between commands, and
//! records are copied with unaligned accesses. The format is self-describing
//! (the tag determines the record size) but ABI-stable only within one
//! build.

use std::ptr;

use crate::commands::{read_command, write_command, Command, CommandRecord, CommandTag};

/// Encodes commands into a caller-owned byte buffer.
///
/// Running out of space is a contract violation: the caller sizes the
/// buffer, so overflow panics instead of reporting an error.
pub struct CommandWriter<'a> {
    buffer: &'a mut [u8],
    cursor: usize,
}

impl<'a> CommandWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        CommandWriter { buffer, cursor: 0 }
    }

    /// Appends `command` to the stream.
    pub fn put<C: CommandRecord>(&mut self, command: C) {
        assert!(
            self.can_accommodate::<C>(),
            "command stream writer out of space ({})",
            C::TAG.name()
        );
        unsafe {
            let dest = self.buffer.as_mut_ptr().add(self.cursor);
            *dest = C::TAG as u8;
            ptr::write_unaligned(dest.add(1) as *mut C, command);
        }
        self.cursor += 1 + std::mem::size_of::<C>();
    }

    /// Appends an already-decoded command (used when replaying a parsed
    /// stream into another buffer).
    pub fn put_parsed(&mut self, command: &Command) {
        let size = command.tag().record_size();
        assert!(
            self.remaining() >= 1 + size,
            "command stream writer out of space ({})",
            command.tag().name()
        );
        unsafe {
            let dest = self.buffer.as_mut_ptr().add(self.cursor);
            *dest = command.tag() as u8;
            write_command(command, dest.add(1));
        }
        self.cursor += 1 + size;
    }

    /// Bytes written so far.
    pub fn size(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Discards all written commands, keeping the buffer.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn can_accommodate<C: CommandRecord>(&self) -> bool {
        self.remaining() >= 1 + std::mem::size_of::<C>()
    }

    /// The written portion of the buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.cursor]
    }
}

/// Decodes a command stream, yielding commands in encoding order.
///
/// A malformed stream (unknown tag, truncated record) is a contract
/// violation and panics.
#[derive(Clone)]
pub struct CommandParser<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> CommandParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        CommandParser { data, cursor: 0 }
    }

    pub fn has_commands_left(&self) -> bool {
        self.cursor < self.data.len()
    }
}

impl<'a> Iterator for CommandParser<'a> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        if self.cursor >= self.data.len() {
            return None;
        }
        let raw_tag = self.data[self.cursor];
        let tag = CommandTag::from_u8(raw_tag)
            .unwrap_or_else(|| panic!("invalid command tag {} in stream", raw_tag));
        let size = tag.record_size();
        assert!(
            self.cursor + 1 + size <= self.data.len(),
            "truncated {} record in command stream",
            tag.name()
        );
        let command = unsafe { read_command(tag, self.data.as_ptr().add(self.cursor + 1)) };
        self.cursor += 1 + size;
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::*;
    use crate::format::Format;
    use crate::handle;
    use crate::types::{ResourceState, ResourceView, ShaderStageFlags};

    fn sample_commands() -> Vec<Command> {
        let mut begin = BeginRenderPass::default();
        begin.add_backbuffer(handle::Resource(3), true);
        begin.set_2d_depth_stencil(handle::Resource(4), Format::Depth32F, crate::types::RtClearType::Clear);
        begin.viewport_width = 1280;
        begin.viewport_height = 720;

        let mut transitions = TransitionResources::default();
        transitions.add(
            handle::Resource(3),
            ResourceState::RenderTarget,
            ShaderStageFlags::empty(),
        );
        transitions.add(
            handle::Resource(7),
            ResourceState::ShaderResource,
            ShaderStageFlags::PIXEL,
        );

        let mut draw = Draw::new(handle::PipelineState(1), 36);
        draw.vertex_buffer = handle::Resource(9);
        draw.index_buffer = handle::Resource(10);
        draw.add_shader_arg(handle::Resource(11), 256, handle::ShaderView(5));
        draw.write_root_constants(&0xAABB_CCDDu32);
        draw.scissor = ScissorRect::new(0, 0, 640, 480);

        let mut clears = ClearTextures::default();
        clears.clear_ops.push(ClearTextureInfo {
            rv: ResourceView::tex2d(handle::Resource(12), Format::Rgba8Un),
            value: crate::types::RtClearValue::color(1.0, 0.0, 0.0, 1.0),
        });

        vec![
            Command::TransitionResources(transitions),
            Command::BeginRenderPass(begin),
            Command::Draw(draw),
            Command::EndRenderPass(EndRenderPass),
            Command::BeginDebugLabel(BeginDebugLabel::new("readback")),
            Command::CopyTextureToBuffer(CopyTextureToBuffer {
                source: handle::Resource(3),
                destination: handle::Resource(13),
                dest_offset_bytes: 0,
                src_width: 4,
                src_height: 4,
                src_mip_index: 0,
                src_array_index: 0,
            }),
            Command::EndDebugLabel(EndDebugLabel),
            Command::WriteTimestamp(WriteTimestamp {
                query_range: handle::QueryRange(2),
                index: 1,
            }),
            Command::ClearTextures(clears),
            Command::Dispatch(Dispatch::new(handle::PipelineState(2), 8, 8, 1)),
        ]
    }

    #[test]
    fn writer_and_parser_are_mutual_inverses() {
        let commands = sample_commands();
        let mut buffer = vec![0u8; 4096];
        let mut writer = CommandWriter::new(&mut buffer);
        for cmd in &commands {
            writer.put_parsed(cmd);
        }

        let parsed: Vec<Command> = CommandParser::new(writer.bytes()).collect();
        assert_eq!(parsed, commands);
    }

    #[test]
    fn typed_put_matches_parsed_replay() {
        let mut buffer_a = vec![0u8; 1024];
        let mut writer = CommandWriter::new(&mut buffer_a);
        writer.put(Dispatch::new(handle::PipelineState(2), 4, 4, 4));
        writer.put(EndDebugLabel);
        let parsed: Vec<Command> = CommandParser::new(writer.bytes()).collect();

        let mut buffer_b = vec![0u8; 1024];
        let mut replay = CommandWriter::new(&mut buffer_b);
        for cmd in &parsed {
            replay.put_parsed(cmd);
        }
        assert_eq!(writer.bytes(), replay.bytes());
    }

    #[test]
    fn records_are_tightly_packed() {
        let mut buffer = vec![0u8; 256];
        let mut writer = CommandWriter::new(&mut buffer);
        writer.put(EndRenderPass);
        writer.put(EndDebugLabel);
        // two zero-sized records take exactly their two tag bytes
        assert_eq!(writer.size(), 2);

        writer.put(WriteTimestamp {
            query_range: handle::QueryRange(0),
            index: 0,
        });
        assert_eq!(writer.size(), 2 + 1 + std::mem::size_of::<WriteTimestamp>());
    }

    #[test]
    #[should_panic(expected = "out of space")]
    fn overflow_is_a_contract_violation() {
        let mut buffer = vec![0u8; 8];
        let mut writer = CommandWriter::new(&mut buffer);
        writer.put(Draw::default());
    }

    #[test]
    fn empty_stream_parses_to_nothing() {
        assert_eq!(CommandParser::new(&[]).count(), 0);
    }
}
