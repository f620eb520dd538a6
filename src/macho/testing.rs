//! Synthetic Mach-O images for unit tests.

use zerocopy::IntoBytes;

use super::constants::*;
use super::structs::*;

/// One segment of a synthetic image.
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    pub command: SegmentCommand64,
    pub sections: Vec<Section64>,
}

impl SegmentSpec {
    pub fn new(name: &str, vmaddr: u64, fileoff: u64, filesize: u64) -> Self {
        let mut command = SegmentCommand64::default();
        command.set_name(name);
        command.vmaddr = vmaddr;
        command.vmsize = filesize;
        command.fileoff = fileoff;
        command.filesize = filesize;
        Self {
            command,
            sections: Vec::new(),
        }
    }

    pub fn with_section(mut self, name: &str) -> Self {
        let mut section = Section64::default();
        section.set_names(self.command.name(), name);
        section.addr = self.command.vmaddr;
        section.size = self.command.filesize;
        section.offset = self.command.fileoff as u32;
        self.sections.push(section);
        self
    }
}

enum Command {
    Segment(SegmentSpec),
    Raw { cmd: u32, size: u32 },
}

/// Assembles a header and load commands into a buffer.
pub struct MachOBuilder {
    header: MachHeader64,
    commands: Vec<Command>,
}

impl MachOBuilder {
    pub fn new() -> Self {
        Self {
            header: MachHeader64::default(),
            commands: Vec::new(),
        }
    }

    pub fn filetype(mut self, filetype: u32) -> Self {
        self.header.filetype = filetype;
        self
    }

    pub fn segment(mut self, spec: SegmentSpec) -> Self {
        self.commands.push(Command::Segment(spec));
        self
    }

    /// Adds an opaque command of `size` bytes (at least 8).
    pub fn command(mut self, cmd: u32, size: u32) -> Self {
        self.commands.push(Command::Raw { cmd, size });
        self
    }

    pub fn code_signature(self) -> Self {
        self.command(LC_CODE_SIGNATURE, LinkeditDataCommand::SIZE as u32)
    }

    /// Writes the image into a zeroed buffer of `len` bytes.
    pub fn build(self, len: usize) -> Vec<u8> {
        let mut cmds = Vec::new();
        for command in &self.commands {
            match command {
                Command::Segment(spec) => {
                    let mut seg = spec.command;
                    seg.nsects = spec.sections.len() as u32;
                    seg.cmdsize = (SegmentCommand64::SIZE + spec.sections.len() * Section64::SIZE) as u32;
                    cmds.extend_from_slice(seg.as_bytes());
                    for section in &spec.sections {
                        cmds.extend_from_slice(section.as_bytes());
                    }
                }
                Command::Raw { cmd, size } => {
                    let start = cmds.len();
                    cmds.resize(start + *size as usize, 0);
                    cmds[start..start + 4].copy_from_slice(&cmd.to_le_bytes());
                    cmds[start + 4..start + 8].copy_from_slice(&size.to_le_bytes());
                }
            }
        }

        let mut header = self.header;
        header.ncmds = self.commands.len() as u32;
        header.sizeofcmds = cmds.len() as u32;

        let mut data = vec![0u8; len.max(MachHeader64::SIZE + cmds.len())];
        data[..MachHeader64::SIZE].copy_from_slice(header.as_bytes());
        data[MachHeader64::SIZE..MachHeader64::SIZE + cmds.len()].copy_from_slice(&cmds);
        data
    }
}
