//! Binary STL output.
//!
//! Layout: 80-byte header, little-endian u32 triangle count, then 50 bytes
//! per triangle (normal, three vertices, u16 attribute count). The count is
//! patched in when the writer finishes, so triangles can be streamed straight
//! from the render channel.

use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::{bail, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use isosurface_bridge::{Point3, Triangle3};

const HEADER_LEN: usize = 80;
const COUNT_OFFSET: u64 = HEADER_LEN as u64;

/// Streaming binary STL writer.
pub struct StlWriter<W: Write + Seek> {
    inner: W,
    count: u32,
}

impl<W: Write + Seek> StlWriter<W> {
    /// Write the header and a placeholder count.
    pub fn new(mut inner: W, title: &str) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        let title = title.as_bytes();
        let n = title.len().min(HEADER_LEN);
        header[..n].copy_from_slice(&title[..n]);
        inner.write_all(&header)?;
        inner.write_u32::<LittleEndian>(0)?;
        Ok(Self { inner, count: 0 })
    }

    /// Append one triangle.
    pub fn push(&mut self, triangle: &Triangle3) -> Result<()> {
        write_point(&mut self.inner, triangle.normal())?;
        for v in triangle.vertices() {
            write_point(&mut self.inner, *v)?;
        }
        self.inner.write_u16::<LittleEndian>(0)?;
        self.count += 1;
        Ok(())
    }

    /// Triangles written so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Patch the triangle count and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.inner.seek(SeekFrom::Start(COUNT_OFFSET))?;
        self.inner.write_u32::<LittleEndian>(self.count)?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn write_point<W: Write>(w: &mut W, p: Point3) -> Result<()> {
    w.write_f32::<LittleEndian>(p.x as f32)?;
    w.write_f32::<LittleEndian>(p.y as f32)?;
    w.write_f32::<LittleEndian>(p.z as f32)?;
    Ok(())
}

fn read_point<R: Read>(r: &mut R) -> Result<Point3> {
    let x = r.read_f32::<LittleEndian>()?;
    let y = r.read_f32::<LittleEndian>()?;
    let z = r.read_f32::<LittleEndian>()?;
    Ok(Point3::new(f64::from(x), f64::from(y), f64::from(z)))
}

/// Read a binary STL back into triangles.
pub fn read_binary_stl<R: Read>(mut reader: R) -> Result<Vec<Triangle3>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let count = reader.read_u32::<LittleEndian>()?;

    let mut triangles = Vec::with_capacity(count as usize);
    for i in 0..count {
        let _normal = read_point(&mut reader)?;
        let a = read_point(&mut reader)?;
        let b = read_point(&mut reader)?;
        let c = read_point(&mut reader)?;
        if reader.read_u16::<LittleEndian>()? != 0 {
            bail!("triangle {} has a non-zero attribute byte count", i);
        }
        triangles.push(Triangle3::new(a, b, c));
    }
    Ok(triangles)
}
