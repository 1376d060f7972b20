// Functions for managing FreeSurfer brain surface meshes in binary 'surf' files.
// These files store a triangular mesh, where each vertex if defined by its x,y,z coord and
// each face is defined by 3 vertices, stored as 3 indices into the vertices.


use byteordered::byteorder::ReadBytesExt;
use byteordered::ByteOrdered;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{BrainprintError, Result};
use crate::mesh::TriaMesh;
use crate::util::{is_gz_file, read_double_newline_terminated_string};

pub const TRIS_MAGIC_FILE_TYPE_NUMBER: i32 = 16777214;

#[derive(Debug, Clone, PartialEq)]
pub struct FsSurfaceHeader {
    pub surf_magic: [u8; 3],
    pub info_line: String,
    pub num_vertices: i32,
    pub num_faces: i32,
}


impl Default for FsSurfaceHeader {
    fn default() -> FsSurfaceHeader {
        FsSurfaceHeader {
            surf_magic: [255; 3],
            info_line: String::from(""),
            num_vertices: 0,
            num_faces: 0
        }
    }
}

impl FsSurfaceHeader {

    /// Read an FsSurface header from the given byte stream.
    /// It is assumed that the input is currently at the start of the
    /// FsSurface header.
    pub fn from_reader<S>(input: &mut S) -> Result<FsSurfaceHeader>
    where
        S: Read,
    {
        let mut hdr = FsSurfaceHeader::default();

        for v in &mut hdr.surf_magic {
            *v = input.read_u8()?;
        }

        let magic: i32 = interpret_fs_int24(hdr.surf_magic[0], hdr.surf_magic[1], hdr.surf_magic[2]);
        if magic != TRIS_MAGIC_FILE_TYPE_NUMBER {
            return Err(BrainprintError::InvalidFsSurfaceFormat);
        }

        hdr.info_line = read_double_newline_terminated_string(input)?;

        let mut input = ByteOrdered::be(input);
        hdr.num_vertices = input.read_i32()?;
        hdr.num_faces = input.read_i32()?;

        if hdr.num_vertices < 0 || hdr.num_faces < 0 {
            return Err(BrainprintError::InvalidFsSurfaceFormat);
        }
        Ok(hdr)
    }
}


/// Interpret three bytes as a single 24 bit integer, FreeSurfer style.
pub fn interpret_fs_int24(b1: u8, b2:u8, b3:u8) -> i32 {
    let c1 = (b1 as u32).checked_shl(16).unwrap_or(0);
    let c2 = (b2 as u32).checked_shl(8).unwrap_or(0);
    let c3 = b3 as i32;

    let fs_int24: i32 = c1 as i32 + c2 as i32 + c3;
    fs_int24
}


/// An FsSurface object: a brain mesh read from a FreeSurfer surf file, e.g., `surf/lh.white`.
#[derive(Debug, PartialEq, Clone)]
pub struct FsSurface {
    pub header: FsSurfaceHeader,
    pub mesh: TriaMesh,
}


/// Read a FreeSurfer brain surface mesh, e.g., `subjects_dir/subject1/surf/lh.white`.
pub fn read_surf<P: AsRef<Path>>(path: P) -> Result<FsSurface> {
    FsSurface::from_file(path)
}


/// Write a brain mesh to a FreeSurfer surf file. The file is GZip compressed if its name ends with ".gz".
pub fn write_surf<P: AsRef<Path>>(path: P, surf: &FsSurface) -> Result<()> {
    surf.to_file(path)
}


impl FsSurface {

    /// Wrap a mesh with a matching header.
    pub fn from_mesh(mesh: TriaMesh) -> FsSurface {
        let header = FsSurfaceHeader {
            surf_magic: [255, 255, 254],
            info_line: String::from("created by brainprint"),
            num_vertices: mesh.num_vertices() as i32,
            num_faces: mesh.num_triangles() as i32,
        };
        FsSurface { header, mesh }
    }

    /// Read an FsSurface instance from a file.
    /// If the file's name ends with ".gz", the file is assumed to need GZip decoding. This is not typically the case
    /// for FreeSurfer Surface files, but very handy (and it helps us to reduce the size of our test data).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsSurface> {
        let gz = is_gz_file(&path);
        let file = BufReader::new(File::open(path)?);
        if gz {
            FsSurface::from_reader(GzDecoder::new(file))
        } else {
            FsSurface::from_reader(file)
        }
    }

    /// Read header and mesh from the given byte stream, which must be at the start of the file.
    pub fn from_reader<S>(mut input: S) -> Result<FsSurface>
    where
        S: Read,
    {
        let hdr = FsSurfaceHeader::from_reader(&mut input)?;
        let mesh = FsSurface::mesh_from_reader(&mut input, &hdr)?;
        Ok(FsSurface { header: hdr, mesh })
    }

    /// Read the vertex and face data following the header.
    pub fn mesh_from_reader<S>(input: &mut S, hdr: &FsSurfaceHeader) -> Result<TriaMesh>
    where
        S: Read,
    {
        let mut input = ByteOrdered::be(input);

        let mut vertex_data: Vec<[f64; 3]> = Vec::with_capacity(hdr.num_vertices as usize);
        for _ in 0..hdr.num_vertices {
            let x = input.read_f32()? as f64;
            let y = input.read_f32()? as f64;
            let z = input.read_f32()? as f64;
            vertex_data.push([x, y, z]);
        }

        let mut face_data: Vec<[usize; 3]> = Vec::with_capacity(hdr.num_faces as usize);
        for _ in 0..hdr.num_faces {
            let mut face = [0usize; 3];
            for v in face.iter_mut() {
                let idx = input.read_i32()?;
                if idx < 0 {
                    return Err(BrainprintError::InvalidFsSurfaceFormat);
                }
                *v = idx as usize;
            }
            face_data.push(face);
        }

        TriaMesh::new(vertex_data, face_data)
    }

    /// Write this surface to a file, GZip compressed if the file name ends with ".gz".
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let gz = is_gz_file(&path);
        let file = BufWriter::new(File::create(path)?);
        if gz {
            let mut encoder = GzEncoder::new(file, Compression::default());
            self.to_writer(&mut encoder)?;
            encoder.finish()?.flush()?;
        } else {
            let mut file = file;
            self.to_writer(&mut file)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Write this surface in surf format to the given byte stream.
    pub fn to_writer<W>(&self, output: &mut W) -> Result<()>
    where
        W: Write,
    {
        output.write_all(&[255, 255, 254])?;
        output.write_all(self.header.info_line.as_bytes())?;
        output.write_all(b"\n\n")?;

        let mut output = ByteOrdered::be(output);
        output.write_i32(self.mesh.num_vertices() as i32)?;
        output.write_i32(self.mesh.num_triangles() as i32)?;
        for v in self.mesh.vertices.iter() {
            for &c in v.iter() {
                output.write_f32(c as f32)?;
            }
        }
        for t in self.mesh.triangles.iter() {
            for &idx in t.iter() {
                output.write_i32(idx as i32)?;
            }
        }
        Ok(())
    }
}
