//! Functions for managing FreeSurfer brain volumes in binary 'MGH' files.
//!
//! A segmentation like `mri/aseg.mgz` is an MGH volume with one label integer per voxel.


use byteordered::ByteOrdered;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array, Array3, Array4, Axis, ShapeBuilder};

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{BrainprintError, Result};
use crate::util::is_gz_file;

pub const MGH_VERSION: i32 = 1;

pub const MRI_UCHAR: i32 = 0;
pub const MRI_INT: i32 = 1;
pub const MRI_FLOAT: i32 = 3;
pub const MRI_SHORT: i32 = 4;

pub const MGH_DATATYPE_NAMES : [&str; 4] = ["MRI_UCHAR", "MRI_INT", "MRI_FLOAT", "MRI_SHORT"];
pub const MGH_DATATYPE_CODES : [i32; 4] = [MRI_UCHAR, MRI_INT, MRI_FLOAT, MRI_SHORT];
pub const MGH_DATA_START : usize = 284; // The index in bytes where the data part starts in an MGH file.

const MGH_HEADER_USED_BYTES: usize = 30; // Header bytes before the optional RAS block.
const MGH_RAS_BLOCK_BYTES: usize = 60;

/// Bytes per value of an MGH data type, `None` for unsupported types.
pub fn mgh_dtype_size(dtype: i32) -> Option<usize> {
    match dtype {
        MRI_UCHAR => Some(1),
        MRI_INT | MRI_FLOAT => Some(4),
        MRI_SHORT => Some(2),
        _ => None,
    }
}

/// Models the header of a FreeSurfer MGH file containing a brain volume.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMghHeader {
    pub mgh_format_version: i32,
    pub dim1len: i32,
    pub dim2len: i32,
    pub dim3len: i32,
    pub dim4len: i32,  // aka "num_frames"
    pub dtype: i32,
    pub dof: i32,
    pub is_ras_good: i16,
    pub delta: [f32; 3],
    pub mdc_raw: [f32; 9],
    pub p_xyz_c: [f32; 3],
}


/// Models a FreeSurfer MGH file. Exactly one of the data fields is set, depending on the header `dtype`.
#[derive(Debug, Clone, PartialEq)]
pub struct FsMgh {
    pub header: FsMghHeader,
    pub data_mri_uchar: Option<Array4<u8>>,
    pub data_mri_float: Option<Array4<f32>>,
    pub data_mri_int: Option<Array4<i32>>,
    pub data_mri_short: Option<Array4<i16>>,
}


impl Default for FsMghHeader {
    fn default() -> FsMghHeader {
        FsMghHeader {
            mgh_format_version: MGH_VERSION,
            dim1len: 0,
            dim2len: 0,
            dim3len: 0,
            dim4len: 1,
            dtype: MRI_INT,
            dof: 0,
            is_ras_good: 0,
            delta: [1.; 3],
            mdc_raw: [-1., 0., 0., 0., 0., -1., 0., 1., 0.],
            p_xyz_c: [0.; 3],
        }
    }
}

/// The header of an MGH/MGZ file.
impl FsMghHeader {

    /// Read an MGH header from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMghHeader> {
        let gz = is_gz_file(&path);
        let mut file = BufReader::new(File::open(path)?);
        if gz {
            FsMghHeader::from_reader(&mut GzDecoder::new(file))
        } else {
            FsMghHeader::from_reader(&mut file)
        }
    }


    /// Read an MGH header from the given byte stream.
    /// It is assumed that the input is currently at the start of the
    /// header. Exactly the used header bytes are consumed, see [`MGH_DATA_START`] for the start of the data.
    pub fn from_reader<S>(input: &mut S) -> Result<FsMghHeader>
    where
        S: Read,
    {
        let mut hdr = FsMghHeader::default();

        let mut input = ByteOrdered::be(input);

        hdr.mgh_format_version = input.read_i32()?;

        if hdr.mgh_format_version != MGH_VERSION {
            return Err(BrainprintError::InvalidFsMghFormat);
        }

        hdr.dim1len = input.read_i32()?;
        hdr.dim2len = input.read_i32()?;
        hdr.dim3len = input.read_i32()?;
        hdr.dim4len = input.read_i32()?;

        if hdr.dim1len < 1 || hdr.dim2len < 1 || hdr.dim3len < 1 || hdr.dim4len < 1 {
            return Err(BrainprintError::InvalidFsMghFormat);
        }

        hdr.dtype = input.read_i32()?;
        hdr.dof = input.read_i32()?;

        hdr.is_ras_good = input.read_i16()?;

        if hdr.is_ras_good == 1 as i16 {
            for idx in 0..3 { hdr.delta[idx] = input.read_f32()?; }
            for idx in 0..9 { hdr.mdc_raw[idx] = input.read_f32()?; }
            for idx in 0..3 { hdr.p_xyz_c[idx] = input.read_f32()?; }
        }
        Ok(hdr)
    }

    /// The number of header bytes consumed by [`FsMghHeader::from_reader`].
    fn used_bytes(&self) -> usize {
        if self.is_ras_good == 1 { MGH_HEADER_USED_BYTES + MGH_RAS_BLOCK_BYTES } else { MGH_HEADER_USED_BYTES }
    }

    /// The voxel size in mm along the 3 spatial dimensions. Defaults to 1 mm if the RAS block is not valid.
    pub fn voxel_size(&self) -> [f32; 3] {
        if self.is_ras_good == 1 { self.delta } else { [1.; 3] }
    }

    /// The number of values over all frames, `None` if it overflows.
    pub fn num_values(&self) -> Option<usize> {
        let (d1, d2, d3, d4) = self.dims();
        d1.checked_mul(d2)?.checked_mul(d3)?.checked_mul(d4)
    }

    /// The shape of the volume data: (dim1len, dim2len, dim3len, num_frames).
    pub fn dims(&self) -> (usize, usize, usize, usize) {
        (self.dim1len as usize, self.dim2len as usize, self.dim3len as usize, self.dim4len as usize)
    }

    /// The FreeSurfer tkregister voxel-to-surface-RAS transform, the coordinate system of surf files.
    ///
    /// Only the upper 3 rows of the 4x4 matrix are returned, the last row is always `[0, 0, 0, 1]`.
    pub fn vox2ras_tkr(&self) -> [[f64; 4]; 3] {
        let d = self.voxel_size();
        let (d0, d1, d2) = (d[0] as f64, d[1] as f64, d[2] as f64);
        let n0 = self.dim1len as f64 * d0 / 2.0;
        let n1 = self.dim2len as f64 * d1 / 2.0;
        let n2 = self.dim3len as f64 * d2 / 2.0;
        [
            [-d0, 0.0, 0.0, n0],
            [0.0, 0.0, d2, -n2],
            [0.0, -d1, 0.0, n1],
        ]
    }
}


impl FsMgh {

    /// Read an MGH or MGZ file. Files ending in ".mgz" or ".gz" are GZip decoded.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
        let gz = is_gz_file(&path);
        let file = BufReader::new(File::open(path)?);
        if gz {
            FsMgh::from_reader(GzDecoder::new(file))
        } else {
            FsMgh::from_reader(file)
        }
    }

    /// Read header and first data block from the given byte stream, which must be at the start of the file.
    pub fn from_reader<S>(mut input: S) -> Result<FsMgh>
    where
        S: Read,
    {
        let hdr = FsMghHeader::from_reader(&mut input)?;

        // Skip the unused rest of the header. We cannot seek in a GZ stream.
        let mut skip = vec![0u8; MGH_DATA_START - hdr.used_bytes()];
        input.read_exact(&mut skip)?;

        let value_size = mgh_dtype_size(hdr.dtype).ok_or(BrainprintError::UnsupportedMghDatatype(hdr.dtype))?;
        let num_values = hdr.num_values().ok_or(BrainprintError::InvalidFsMghFormat)?;
        let num_bytes = num_values.checked_mul(value_size).ok_or(BrainprintError::InvalidFsMghFormat)?;

        // The header dimensions are not trusted for allocation, only what the stream actually holds.
        let mut raw = Vec::new();
        (&mut input).take(num_bytes as u64).read_to_end(&mut raw)?;
        if raw.len() != num_bytes {
            return Err(BrainprintError::InvalidFsMghFormat);
        }

        let (d1, d2, d3, d4) = hdr.dims();
        let shape = (d1, d2, d3, d4).f();
        let mut values = ByteOrdered::be(&raw[..]);

        let mut mgh = FsMgh {
            header: hdr.clone(),
            data_mri_uchar: None,
            data_mri_float: None,
            data_mri_int: None,
            data_mri_short: None,
        };

        // MGH stores voxels in column-major order.
        match hdr.dtype {
            MRI_UCHAR => {
                mgh.data_mri_uchar = Some(Array::from_shape_vec(shape, raw.to_vec()).map_err(|_| BrainprintError::InvalidFsMghFormat)?);
            },
            MRI_INT => {
                let mut data = Vec::with_capacity(num_values);
                for _ in 0..num_values { data.push(values.read_i32()?); }
                mgh.data_mri_int = Some(Array::from_shape_vec(shape, data).map_err(|_| BrainprintError::InvalidFsMghFormat)?);
            },
            MRI_FLOAT => {
                let mut data = Vec::with_capacity(num_values);
                for _ in 0..num_values { data.push(values.read_f32()?); }
                mgh.data_mri_float = Some(Array::from_shape_vec(shape, data).map_err(|_| BrainprintError::InvalidFsMghFormat)?);
            },
            MRI_SHORT => {
                let mut data = Vec::with_capacity(num_values);
                for _ in 0..num_values { data.push(values.read_i16()?); }
                mgh.data_mri_short = Some(Array::from_shape_vec(shape, data).map_err(|_| BrainprintError::InvalidFsMghFormat)?);
            },
            other => return Err(BrainprintError::UnsupportedMghDatatype(other)),
        }

        Ok(mgh)
    }

    /// Wrap integer label data as an MGH volume with 1 mm isotropic voxels.
    pub fn from_labels(labels: Array3<i32>) -> FsMgh {
        let (d1, d2, d3) = labels.dim();
        let header = FsMghHeader {
            dim1len: d1 as i32,
            dim2len: d2 as i32,
            dim3len: d3 as i32,
            dim4len: 1,
            dtype: MRI_INT,
            is_ras_good: 1,
            ..FsMghHeader::default()
        };
        FsMgh {
            header,
            data_mri_uchar: None,
            data_mri_float: None,
            data_mri_int: Some(labels.insert_axis(Axis(3))),
            data_mri_short: None,
        }
    }

    /// The given frame of the volume as integer labels. Float data is rounded.
    pub fn frame_labels(&self, frame: usize) -> Result<Array3<i32>> {
        if frame >= self.header.dims().3 {
            return Err(BrainprintError::InvalidFsMghFormat);
        }
        if let Some(data) = &self.data_mri_uchar {
            Ok(data.index_axis(Axis(3), frame).mapv(|v| v as i32))
        } else if let Some(data) = &self.data_mri_int {
            Ok(data.index_axis(Axis(3), frame).to_owned())
        } else if let Some(data) = &self.data_mri_float {
            Ok(data.index_axis(Axis(3), frame).mapv(|v| v.round() as i32))
        } else if let Some(data) = &self.data_mri_short {
            Ok(data.index_axis(Axis(3), frame).mapv(|v| v as i32))
        } else {
            Err(BrainprintError::UnsupportedMghDatatype(self.header.dtype))
        }
    }

    /// Write this volume to a file, GZip compressed if the file name ends with ".mgz" or ".gz".
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

    /// Write this volume in MGH format to the given byte stream.
    pub fn to_writer<W>(&self, output: &mut W) -> Result<()>
    where
        W: Write,
    {
        let hdr = &self.header;
        {
            let mut output = ByteOrdered::be(&mut *output);
            output.write_i32(MGH_VERSION)?;
            output.write_i32(hdr.dim1len)?;
            output.write_i32(hdr.dim2len)?;
            output.write_i32(hdr.dim3len)?;
            output.write_i32(hdr.dim4len)?;
            output.write_i32(hdr.dtype)?;
            output.write_i32(hdr.dof)?;
            output.write_i16(hdr.is_ras_good)?;
            if hdr.is_ras_good == 1 {
                for v in hdr.delta.iter().chain(hdr.mdc_raw.iter()).chain(hdr.p_xyz_c.iter()) {
                    output.write_f32(*v)?;
                }
            }
        }
        output.write_all(&vec![0u8; MGH_DATA_START - hdr.used_bytes()])?;

        let mut output = ByteOrdered::be(output);
        // Iterating the reversed axes of a 4D array visits the voxels in column-major order.
        if let Some(data) = &self.data_mri_uchar {
            for v in data.t().iter() { output.write_u8(*v)?; }
        } else if let Some(data) = &self.data_mri_int {
            for v in data.t().iter() { output.write_i32(*v)?; }
        } else if let Some(data) = &self.data_mri_float {
            for v in data.t().iter() { output.write_f32(*v)?; }
        } else if let Some(data) = &self.data_mri_short {
            for v in data.t().iter() { output.write_i16(*v)?; }
        } else {
            return Err(BrainprintError::UnsupportedMghDatatype(hdr.dtype));
        }
        Ok(())
    }
}


/// Read an MGH or MGZ file, e.g., `subjects_dir/subject1/mri/aseg.mgz`.
pub fn read_mgh<P: AsRef<Path>>(path: P) -> Result<FsMgh> {
    FsMgh::from_file(path)
}


/// Write an MGH or MGZ file.
pub fn write_mgh<P: AsRef<Path>>(path: P, mgh: &FsMgh) -> Result<()> {
    mgh.to_file(path)
}
