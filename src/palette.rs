use byteorder::ReadBytesExt;
use bytes::BufMut;
use std::io::{self, Read, Write};

/// Size of one serialized palette entry (blue, green, red, reserved).
pub const PALETTE_ENTRY_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

/// Color table whose length is fixed when it is built.
///
/// Slots the source does not cover are black; entries past the table length
/// are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaletteTable {
    entries: Box<[Rgb]>,
}

impl PaletteTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of entries an indexed frame of the given depth addresses.
    pub fn capacity_for(bits_per_pixel: u16) -> usize {
        match bits_per_pixel {
            1..=8 => 1 << bits_per_pixel,
            _ => 0,
        }
    }

    pub fn from_bitmap_palette(entries: &[Rgb], len: usize) -> Self {
        let entries = (0..len)
            .map(|n| entries.get(n).copied().unwrap_or(Rgb::BLACK))
            .collect();
        Self { entries }
    }

    pub fn from_existing_table(other: &PaletteTable, len: usize) -> Self {
        Self::from_bitmap_palette(&other.entries, len)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Rgb] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<Rgb> {
        self.entries.get(index).copied()
    }

    /// Serialized size in bytes.
    pub fn byte_len(&self) -> usize {
        self.entries.len() * PALETTE_ENTRY_SIZE
    }

    pub fn put_into<B: BufMut>(&self, buf: &mut B) {
        for entry in self.entries.iter() {
            buf.put_slice(&[entry.blue, entry.green, entry.red, 0]);
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(self.byte_len());
        self.put_into(&mut buf);
        writer.write_all(&buf)
    }

    pub fn read_from<R: Read>(reader: &mut R, count: usize) -> io::Result<Self> {
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let blue = reader.read_u8()?;
            let green = reader.read_u8()?;
            let red = reader.read_u8()?;
            let _reserved = reader.read_u8()?;
            entries.push(Rgb::new(red, green, blue));
        }
        Ok(Self {
            entries: entries.into_boxed_slice(),
        })
    }
}
