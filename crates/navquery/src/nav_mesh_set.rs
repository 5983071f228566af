//! The navmesh set file: the grid parameters followed by every tile of a [`NavMesh`].
//!
//! ```text
//! magic: u32 = 'MSET', version: u32 = 1, tile count: i32,
//! origin: [f32; 3], tile width: f32, tile height: f32, max tiles: i32, max polygons: i32,
//! per tile: tile reference: u64, data size: i32, data: [u8; size]
//! ```
//!
//! All values are little-endian.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use glam::Vec3;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{NavMesh, NavMeshError, NavMeshParams, PolyRef};

/// Navmesh set magic, `'M' << 24 | 'S' << 16 | 'E' << 8 | 'T'`.
pub const NAVMESH_SET_MAGIC: u32 = u32::from_be_bytes(*b"MSET");
/// Navmesh set version.
pub const NAVMESH_SET_VERSION: u32 = 1;

/// Writes every tile of the navmesh, including flag and area changes made after loading.
pub fn save_navmesh_set(nav_mesh: &NavMesh, mut writer: impl Write) -> Result<(), NavMeshSetError> {
    let tiles: Vec<_> = nav_mesh.tiles().collect();
    let params = nav_mesh.params();

    writer.write_u32::<LittleEndian>(NAVMESH_SET_MAGIC)?;
    writer.write_u32::<LittleEndian>(NAVMESH_SET_VERSION)?;
    writer.write_i32::<LittleEndian>(tiles.len() as i32)?;
    for c in params.origin.to_array() {
        writer.write_f32::<LittleEndian>(c)?;
    }
    writer.write_f32::<LittleEndian>(params.tile_width)?;
    writer.write_f32::<LittleEndian>(params.tile_height)?;
    writer.write_i32::<LittleEndian>(params.max_tiles as i32)?;
    writer.write_i32::<LittleEndian>(params.max_polys as i32)?;

    for (tile_ref, tile) in tiles {
        let data = tile.data().to_bytes();
        writer.write_u64::<LittleEndian>(tile_ref.0)?;
        writer.write_i32::<LittleEndian>(data.len() as i32)?;
        writer.write_all(&data)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a navmesh set. Tiles keep the references they were saved with.
///
/// Tile slots are only allocated for the tiles actually read, whatever limit the header names.
///
/// A tile entry with a zero reference or size ends the tile list early.
pub fn load_navmesh_set(mut reader: impl Read) -> Result<NavMesh, NavMeshSetError> {
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != NAVMESH_SET_MAGIC {
        return Err(NavMeshSetError::WrongMagic(magic));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != NAVMESH_SET_VERSION {
        return Err(NavMeshSetError::WrongVersion(version));
    }
    let tile_count = reader.read_i32::<LittleEndian>()?;
    let origin = Vec3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    );
    let tile_width = reader.read_f32::<LittleEndian>()?;
    let tile_height = reader.read_f32::<LittleEndian>()?;
    let max_tiles = reader.read_i32::<LittleEndian>()?;
    let max_polys = reader.read_i32::<LittleEndian>()?;
    let (Ok(max_tiles), Ok(max_polys)) = (u32::try_from(max_tiles), u32::try_from(max_polys)) else {
        return Err(NavMeshError::InvalidParams("negative tile or polygon limit").into());
    };
    if i64::from(tile_count) > i64::from(max_tiles) {
        return Err(NavMeshError::InvalidParams("more tiles than tile slots").into());
    }

    let mut nav_mesh = NavMesh::new(NavMeshParams {
        origin,
        tile_width,
        tile_height,
        max_tiles,
        max_polys,
    })?;

    for i in 0..tile_count.max(0) {
        let tile_ref = PolyRef(reader.read_u64::<LittleEndian>()?);
        let size = reader.read_i32::<LittleEndian>()?;
        if tile_ref.is_null() || size <= 0 {
            if i + 1 < tile_count {
                warn!("Navmesh set announces {tile_count} tiles but ends after {i}");
            }
            break;
        }
        let mut data = vec![0; size as usize];
        reader.read_exact(&mut data)?;
        nav_mesh.add_tile(&data, Some(tile_ref))?;
    }
    debug!("Loaded a navmesh set with {} tiles", nav_mesh.tile_count());
    Ok(nav_mesh)
}

/// Saves a navmesh set to a file.
pub fn save_navmesh_set_to_path(
    nav_mesh: &NavMesh,
    path: impl AsRef<Path>,
) -> Result<(), NavMeshSetError> {
    save_navmesh_set(nav_mesh, BufWriter::new(File::create(path)?))
}

/// Loads a navmesh set from a file.
pub fn load_navmesh_set_from_path(path: impl AsRef<Path>) -> Result<NavMesh, NavMeshSetError> {
    load_navmesh_set(BufReader::new(File::open(path)?))
}

/// Errors that can occur while reading or writing a navmesh set.
#[derive(Debug, Error)]
pub enum NavMeshSetError {
    /// The data does not start with [`NAVMESH_SET_MAGIC`].
    #[error("Not a navmesh set, found magic {0:#010x}")]
    WrongMagic(u32),
    /// The set was written in another version.
    #[error("Unsupported navmesh set version {0}")]
    WrongVersion(u32),
    /// Reading or writing failed, including data that ends early.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The parameters or a tile were rejected by the navmesh.
    #[error(transparent)]
    NavMesh(#[from] NavMeshError),
}
