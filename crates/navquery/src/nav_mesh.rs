//! A grid of tiles holding navmesh polygons and the links between them.

use std::collections::{BTreeMap, HashMap};

use glam::{Vec3, Vec3Swizzles as _};
use thiserror::Error;
use tracing::warn;

use crate::{
    PolyRef,
    math::{
        closest_height_point_triangle, closest_pt_point_triangle, dist_pt_seg_sqr_2d,
        opposite_tile, overlap_bounds, overlap_quant_bounds, point_in_polygon,
    },
    poly_ref::{POLY_BITS, SALT_BITS, TILE_BITS},
    tile_data::{EXT_LINK, MeshHeader, MeshTileData, Poly, TileDataError},
};

/// Marks the end of a link list.
pub const NULL_LINK: u32 = u32::MAX;

/// The layout of the tile grid.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// The world space origin of the tile grid
    pub origin: Vec3,
    /// The width of each tile along the x-axis `[Units: wu]`
    pub tile_width: f32,
    /// The height of each tile along the z-axis `[Units: wu]`
    pub tile_height: f32,
    /// The number of tile slots. `[Limit: <= 2^28]`
    pub max_tiles: u32,
    /// The maximum number of polygons per tile. `[Limit: <= 2^20]`
    pub max_polys: u32,
}

/// A connection from one polygon to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// The polygon the link leads to
    pub reference: PolyRef,
    /// Index of the next link of the same polygon, [`NULL_LINK`] for the last one
    pub next: u32,
    /// The edge of the owning polygon the link crosses, `0xff` for links into off-mesh connections
    pub edge: u8,
    /// The tile side the link crosses, `0xff` for links inside the tile
    pub side: u8,
    /// The start of the shared portal along the edge, `0..=255`
    pub bmin: u8,
    /// The end of the shared portal along the edge, `0..=255`
    pub bmax: u8,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            reference: PolyRef::NULL,
            next: NULL_LINK,
            edge: 0,
            side: 0xff,
            bmin: 0,
            bmax: 0,
        }
    }
}

/// A tile that has been added to a [`NavMesh`].
#[derive(Debug, Clone)]
pub struct MeshTile {
    salt: u32,
    data: MeshTileData,
    links: Vec<Link>,
    first_link: Vec<u32>,
    free_link: u32,
}

impl MeshTile {
    fn new(salt: u32, data: MeshTileData) -> Self {
        let first_link = vec![NULL_LINK; data.polygons.len()];
        let links = Vec::with_capacity(data.header.max_link_count as usize);
        Self {
            salt,
            data,
            links,
            first_link,
            free_link: NULL_LINK,
        }
    }

    /// The tile contents.
    #[inline]
    pub fn data(&self) -> &MeshTileData {
        &self.data
    }

    /// The tile header.
    #[inline]
    pub fn header(&self) -> &MeshHeader {
        &self.data.header
    }

    /// The salt of the tile slot at the time the tile was added.
    #[inline]
    pub fn salt(&self) -> u32 {
        self.salt
    }

    /// The links of polygon `poly`, most recently added first.
    pub fn links(&self, poly: usize) -> impl Iterator<Item = &Link> + '_ {
        let mut next = self.first_link.get(poly).copied().unwrap_or(NULL_LINK);
        std::iter::from_fn(move || {
            if next == NULL_LINK {
                return None;
            }
            let link = &self.links[next as usize];
            next = link.next;
            Some(link)
        })
    }

    /// Whether polygon `poly` has at least one link.
    #[inline]
    pub fn has_links(&self, poly: usize) -> bool {
        self.first_link.get(poly).is_some_and(|l| *l != NULL_LINK)
    }

    fn add_link(&mut self, poly: usize, link: Link) {
        let idx = if self.free_link == NULL_LINK {
            self.links.push(link);
            (self.links.len() - 1) as u32
        } else {
            let idx = self.free_link;
            self.free_link = self.links[idx as usize].next;
            self.links[idx as usize] = link;
            idx
        };
        self.links[idx as usize].next = self.first_link[poly];
        self.first_link[poly] = idx;
    }

    /// Drops every link leading into tile slot `target`.
    fn unconnect_links(&mut self, target: u32) {
        for poly in 0..self.first_link.len() {
            let mut prev = NULL_LINK;
            let mut cur = self.first_link[poly];
            while cur != NULL_LINK {
                let next = self.links[cur as usize].next;
                if self.links[cur as usize].reference.tile() == target {
                    if prev == NULL_LINK {
                        self.first_link[poly] = next;
                    } else {
                        self.links[prev as usize].next = next;
                    }
                    self.links[cur as usize] = Link {
                        next: self.free_link,
                        ..Default::default()
                    };
                    self.free_link = cur;
                } else {
                    prev = cur;
                }
                cur = next;
            }
        }
    }

    /// Indices of the ground polygons whose bounds overlap the query box.
    fn query_polygons(&self, qmin: Vec3, qmax: Vec3) -> Vec<usize> {
        let data = &self.data;
        let header = &data.header;
        let mut polys = Vec::new();
        if data.bv_tree.is_empty() {
            for (i, poly) in data.polygons.iter().enumerate() {
                if poly.is_off_mesh_connection() {
                    continue;
                }
                let verts = data.poly_vertices(poly);
                let (bmin, bmax) = verts[1..]
                    .iter()
                    .fold((verts[0], verts[0]), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
                if overlap_bounds(qmin, qmax, bmin, bmax) {
                    polys.push(i);
                }
            }
            return polys;
        }

        let quantize = |v: Vec3, round_up: bool| {
            let q = (v.clamp(header.bmin, header.bmax) - header.bmin) * header.bv_quant_factor;
            q.to_array().map(|c| {
                let c = c as u16;
                if round_up { c.saturating_add(1) | 1 } else { c & 0xfffe }
            })
        };
        let bmin = quantize(qmin, false);
        let bmax = quantize(qmax, true);

        let mut i = 0;
        while i < data.bv_tree.len() {
            let node = &data.bv_tree[i];
            let overlap = overlap_quant_bounds(bmin, bmax, node.bmin, node.bmax);
            if node.is_leaf() && overlap {
                polys.push(node.index as usize);
            }
            if overlap || node.is_leaf() {
                i += 1;
            } else {
                i += (-node.index) as usize;
            }
        }
        polys
    }

    /// The height of the polygon's detail surface at the xz position of `pos`.
    fn poly_height(&self, ip: usize, pos: Vec3) -> Option<f32> {
        let data = &self.data;
        let poly = &data.polygons[ip];
        let verts = data.poly_vertices(poly);
        if poly.is_off_mesh_connection() {
            let (_, t) = dist_pt_seg_sqr_2d(pos, verts[0], verts[1]);
            return Some(verts[0].y + (verts[1].y - verts[0].y) * t);
        }
        if !point_in_polygon(pos, &verts) {
            return None;
        }
        let triangle_count = usize::from(data.detail_meshes[ip].triangle_count);
        for j in 0..triangle_count {
            let [a, b, c] = data.detail_triangle(ip, j);
            if let Some(h) = closest_height_point_triangle(pos, a, b, c) {
                return Some(h);
            }
        }
        // Points exactly on a detail edge can slip through the triangle tests.
        let mut best = (f32::MAX, verts[0].y);
        for j in 0..triangle_count {
            let tri = data.detail_triangle(ip, j);
            for k in 0..3 {
                let (p, q) = (tri[k], tri[(k + 1) % 3]);
                let (d, t) = dist_pt_seg_sqr_2d(pos, p, q);
                if d < best.0 {
                    best = (d, p.y + (q.y - p.y) * t);
                }
            }
        }
        Some(best.1)
    }

    /// The closest point on the polygon and whether `pos` lies over it.
    fn closest_point_on_poly(&self, ip: usize, pos: Vec3) -> (Vec3, bool) {
        let data = &self.data;
        let poly = &data.polygons[ip];
        if poly.is_off_mesh_connection() {
            let [v0, v1] = [0, 1].map(|k| data.vertices[usize::from(poly.vertices[k])]);
            let d0 = pos.distance(v0);
            let d1 = pos.distance(v1);
            let u = if d0 + d1 > 0.0 { d0 / (d0 + d1) } else { 0.0 };
            return (v0.lerp(v1, u), false);
        }
        if let Some(h) = self.poly_height(ip, pos) {
            return (pos.with_y(h), true);
        }
        let mut closest = pos;
        let mut closest_dist = f32::MAX;
        for j in 0..usize::from(data.detail_meshes[ip].triangle_count) {
            let [a, b, c] = data.detail_triangle(ip, j);
            let pt = closest_pt_point_triangle(pos, a, b, c);
            let d = pos.distance_squared(pt);
            if d < closest_dist {
                closest = pt;
                closest_dist = d;
            }
        }
        (closest, false)
    }
}

#[derive(Debug, Clone)]
struct TileSlot {
    salt: u32,
    tile: Option<MeshTile>,
}

impl Default for TileSlot {
    fn default() -> Self {
        Self { salt: 1, tile: None }
    }
}

/// A navigation mesh made of tiles on a regular grid.
///
/// Tiles are added as serialized [`MeshTileData`] and linked to their neighbors on insertion.
/// Polygons are addressed by [`PolyRef`]s.
#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    /// Slots by index, created on first use.
    slots: BTreeMap<u32, TileSlot>,
    /// Slots that held a tile before, reused first.
    free_slots: Vec<u32>,
    /// Lowest index never handed out.
    next_fresh: u32,
    lookup: HashMap<(i32, i32), Vec<u32>>,
}

impl NavMesh {
    /// Creates an empty navmesh.
    pub fn new(params: NavMeshParams) -> Result<Self, NavMeshError> {
        if params.max_tiles == 0 || u64::from(params.max_tiles) > 1 << TILE_BITS {
            return Err(NavMeshError::InvalidParams("max_tiles must be in 1..=2^28"));
        }
        if params.max_polys == 0 || u64::from(params.max_polys) > 1 << POLY_BITS {
            return Err(NavMeshError::InvalidParams("max_polys must be in 1..=2^20"));
        }
        if !(params.tile_width > 0.0 && params.tile_height > 0.0) || !params.origin.is_finite() {
            return Err(NavMeshError::InvalidParams("tile size must be positive"));
        }
        Ok(Self {
            params,
            slots: BTreeMap::new(),
            free_slots: Vec::new(),
            next_fresh: 0,
            lookup: HashMap::new(),
        })
    }

    /// Creates a navmesh holding exactly the given tile.
    pub fn from_single_tile(bytes: &[u8]) -> Result<Self, NavMeshError> {
        let data = MeshTileData::from_bytes(bytes)?;
        let header = &data.header;
        let tile_width = header.bmax.x - header.bmin.x;
        let tile_height = header.bmax.z - header.bmin.z;
        // Place the grid origin so the tile's own location maps back onto its bounds.
        let offset = Vec3::new(header.x as f32 * tile_width, 0.0, header.y as f32 * tile_height);
        let origin = header.bmin - offset;
        let params = NavMeshParams {
            origin,
            tile_width,
            tile_height,
            max_tiles: 1,
            max_polys: data.polygons.len().max(1) as u32,
        };
        let mut nav_mesh = Self::new(params)?;
        nav_mesh.add_tile_data(data, None)?;
        Ok(nav_mesh)
    }

    /// The grid layout.
    #[inline]
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// The number of tile slots.
    #[inline]
    pub fn max_tiles(&self) -> u32 {
        self.params.max_tiles
    }

    /// Parses a tile and adds it.
    ///
    /// Pass the reference the tile had before to restore it into the same slot, keeping
    /// polygon references stable.
    pub fn add_tile(
        &mut self,
        bytes: &[u8],
        last_ref: Option<PolyRef>,
    ) -> Result<PolyRef, NavMeshError> {
        let data = MeshTileData::from_bytes(bytes)?;
        self.add_tile_data(data, last_ref)
    }

    /// Adds a tile and links it to the tiles already in the navmesh. Returns the tile reference.
    pub fn add_tile_data(
        &mut self,
        data: MeshTileData,
        last_ref: Option<PolyRef>,
    ) -> Result<PolyRef, NavMeshError> {
        data.validate()?;
        let MeshHeader { x, y, layer, .. } = data.header;
        if self.tile_ref_at(x, y, layer).is_some() {
            return Err(NavMeshError::TileAlreadyExists { x, y, layer });
        }
        if data.polygons.len() > self.params.max_polys as usize {
            return Err(NavMeshError::TooManyPolygons {
                polygons: data.polygons.len(),
                max: self.params.max_polys as usize,
            });
        }

        let index = self.claim_slot(last_ref)?;
        let slot = self.slots.entry(index).or_default();
        slot.tile = Some(MeshTile::new(slot.salt, data));
        self.lookup.entry((x, y)).or_default().push(index);

        self.connect_int_links(index);
        self.base_off_mesh_links(index);
        self.connect_ext_off_mesh_links(index, index, None);

        for nei in self.tile_indices_at(x, y) {
            if nei == index {
                continue;
            }
            self.connect_ext_links(index, nei, None);
            self.connect_ext_links(nei, index, None);
            self.connect_ext_off_mesh_links(index, nei, None);
            self.connect_ext_off_mesh_links(nei, index, None);
        }
        for side in 0..8 {
            for nei in self.neighbor_tile_indices(x, y, side) {
                self.connect_ext_links(index, nei, Some(side));
                self.connect_ext_links(nei, index, Some(opposite_tile(side)));
                self.connect_ext_off_mesh_links(index, nei, Some(side));
                self.connect_ext_off_mesh_links(nei, index, Some(opposite_tile(side)));
            }
        }

        Ok(self.tile_ref_of(index))
    }

    /// Picks the slot for a new tile. The slot's salt is set, its tile is still empty.
    fn claim_slot(&mut self, last_ref: Option<PolyRef>) -> Result<u32, NavMeshError> {
        let Some(tile_ref) = last_ref.filter(|r| !r.is_null()) else {
            if let Some(index) = self.free_slots.pop() {
                return Ok(index);
            }
            while self.slots.contains_key(&self.next_fresh) {
                self.next_fresh += 1;
            }
            if self.next_fresh >= self.params.max_tiles {
                return Err(NavMeshError::OutOfTiles);
            }
            self.next_fresh += 1;
            return Ok(self.next_fresh - 1);
        };

        let index = tile_ref.tile();
        if index >= self.params.max_tiles {
            return Err(NavMeshError::InvalidTileRef(tile_ref));
        }
        if self.slots.get(&index).is_some_and(|slot| slot.tile.is_some()) {
            return Err(NavMeshError::InvalidTileRef(tile_ref));
        }
        self.free_slots.retain(|i| *i != index);
        self.slots.entry(index).or_default().salt = tile_ref.salt();
        Ok(index)
    }

    /// Removes a tile and returns its serialized data, including flag and area changes.
    pub fn remove_tile(&mut self, tile_ref: PolyRef) -> Result<Vec<u8>, NavMeshError> {
        let index = self.tile_index(tile_ref).ok_or(NavMeshError::InvalidTileRef(tile_ref))?;
        let MeshHeader { x, y, .. } = self
            .tile_by_index(index)
            .map(|t| t.data.header.clone())
            .ok_or(NavMeshError::InvalidTileRef(tile_ref))?;

        if let Some(indices) = self.lookup.get_mut(&(x, y)) {
            indices.retain(|i| *i != index);
            if indices.is_empty() {
                self.lookup.remove(&(x, y));
            }
        }
        let mut neighbors = self.tile_indices_at(x, y);
        for side in 0..8 {
            neighbors.extend(self.neighbor_tile_indices(x, y, side));
        }
        for nei in neighbors {
            if let Some(tile) = self.tile_mut(nei) {
                tile.unconnect_links(index);
            }
        }

        let slot = self.slots.get_mut(&index).ok_or(NavMeshError::InvalidTileRef(tile_ref))?;
        let tile = slot.tile.take().ok_or(NavMeshError::InvalidTileRef(tile_ref))?;
        slot.salt = (slot.salt + 1) & ((1 << SALT_BITS) - 1);
        if slot.salt == 0 {
            slot.salt = 1;
        }
        self.free_slots.push(index);
        Ok(tile.data.to_bytes())
    }

    /// The grid location containing `pos`.
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let x = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let y = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (x, y)
    }

    /// The tile at the given grid location and layer.
    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tile_ref_at(x, y, layer)
            .and_then(|r| self.tile_by_ref(r))
    }

    /// The reference of the tile at the given grid location and layer.
    pub fn tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<PolyRef> {
        self.tile_indices_at(x, y)
            .into_iter()
            .find(|i| self.tile_by_index(*i).is_some_and(|t| t.data.header.layer == layer))
            .map(|i| self.tile_ref_of(i))
    }

    /// All tiles at the given grid location.
    pub fn tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_indices_at(x, y)
            .into_iter()
            .filter_map(|i| self.tile_by_index(i))
            .collect()
    }

    /// The references of all tiles at the given grid location.
    pub fn tile_refs_at(&self, x: i32, y: i32) -> Vec<PolyRef> {
        self.tile_indices_at(x, y)
            .into_iter()
            .map(|i| self.tile_ref_of(i))
            .collect()
    }

    /// The tile a tile or polygon reference belongs to.
    pub fn tile_by_ref(&self, reference: PolyRef) -> Option<&MeshTile> {
        self.tile_index(reference).and_then(|i| self.tile_by_index(i))
    }

    /// Every tile with its reference.
    pub fn tiles(&self) -> impl Iterator<Item = (PolyRef, &MeshTile)> + '_ {
        self.slots
            .iter()
            .filter_map(|(i, slot)| Some((self.tile_ref_of(*i), slot.tile.as_ref()?)))
    }

    /// The number of tiles in the navmesh.
    pub fn tile_count(&self) -> usize {
        self.slots.values().filter(|s| s.tile.is_some()).count()
    }

    /// The reference of polygon 0 of the tile in slot `index`.
    pub(crate) fn tile_ref_of(&self, index: u32) -> PolyRef {
        let salt = self.slots.get(&index).map_or(1, |slot| slot.salt);
        PolyRef::encode(salt, index, 0)
    }

    /// The tile and polygon a reference points at.
    pub fn tile_and_poly_by_ref(
        &self,
        reference: PolyRef,
    ) -> Result<(&MeshTile, &Poly), NavMeshError> {
        let tile = self
            .tile_by_ref(reference)
            .ok_or(NavMeshError::InvalidPolyRef(reference))?;
        let poly = tile
            .data
            .polygons
            .get(reference.poly() as usize)
            .ok_or(NavMeshError::InvalidPolyRef(reference))?;
        Ok((tile, poly))
    }

    /// The polygon a reference points at.
    pub fn poly_by_ref(&self, reference: PolyRef) -> Result<&Poly, NavMeshError> {
        self.tile_and_poly_by_ref(reference).map(|(_, poly)| poly)
    }

    /// Whether the reference points at a polygon of a loaded tile.
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.tile_and_poly_by_ref(reference).is_ok()
    }

    /// The closest point on the polygon's detail surface, and whether `pos` lies over the polygon.
    pub fn closest_point_on_poly(
        &self,
        reference: PolyRef,
        pos: Vec3,
    ) -> Result<(Vec3, bool), NavMeshError> {
        let tile = self
            .tile_by_ref(reference)
            .filter(|t| (reference.poly() as usize) < t.data.polygons.len())
            .ok_or(NavMeshError::InvalidPolyRef(reference))?;
        Ok(tile.closest_point_on_poly(reference.poly() as usize, pos))
    }

    /// The height of the polygon at the xz position of `pos`, `None` if `pos` is not over it.
    pub fn get_poly_height(
        &self,
        reference: PolyRef,
        pos: Vec3,
    ) -> Result<Option<f32>, NavMeshError> {
        let tile = self
            .tile_by_ref(reference)
            .filter(|t| (reference.poly() as usize) < t.data.polygons.len())
            .ok_or(NavMeshError::InvalidPolyRef(reference))?;
        Ok(tile.poly_height(reference.poly() as usize, pos))
    }

    /// The endpoints of an off-mesh connection, ordered in the direction of travel when
    /// coming from `prev_ref`.
    pub fn off_mesh_connection_end_points(
        &self,
        prev_ref: PolyRef,
        poly_ref: PolyRef,
    ) -> Result<(Vec3, Vec3), NavMeshError> {
        let (tile, poly) = self.tile_and_poly_by_ref(poly_ref)?;
        if !poly.is_off_mesh_connection() {
            return Err(NavMeshError::NotAnOffMeshConnection(poly_ref));
        }
        let ip = poly_ref.poly() as usize;
        // The first link of the connection leads back to the polygon it starts from, unless the
        // start could not be connected.
        let (start, end) = match tile.links(ip).find(|l| l.edge == 0) {
            Some(link) if link.reference == prev_ref => (0, 1),
            Some(_) => (1, 0),
            None => (0, 1),
        };
        let v = |k: usize| tile.data.vertices[usize::from(poly.vertices[k])];
        Ok((v(start), v(end)))
    }

    /// Sets the user flags of a polygon.
    pub fn set_poly_flags(&mut self, reference: PolyRef, flags: u16) -> Result<(), NavMeshError> {
        self.poly_mut(reference)?.flags = flags;
        Ok(())
    }

    /// The user flags of a polygon.
    pub fn poly_flags(&self, reference: PolyRef) -> Result<u16, NavMeshError> {
        Ok(self.poly_by_ref(reference)?.flags)
    }

    /// Sets the area id of a polygon. `[Limit: < 64]`
    pub fn set_poly_area(&mut self, reference: PolyRef, area: u8) -> Result<(), NavMeshError> {
        self.poly_mut(reference)?.area = area & 0x3f;
        Ok(())
    }

    /// The area id of a polygon.
    pub fn poly_area(&self, reference: PolyRef) -> Result<u8, NavMeshError> {
        Ok(self.poly_by_ref(reference)?.area)
    }

    /// The ground polygons of a tile whose bounds overlap the query box.
    pub fn query_polygons_in_tile(
        &self,
        tile_ref: PolyRef,
        qmin: Vec3,
        qmax: Vec3,
    ) -> Vec<PolyRef> {
        let Some(tile) = self.tile_by_ref(tile_ref) else {
            return Vec::new();
        };
        let base = tile_ref.tile_ref();
        tile.query_polygons(qmin, qmax)
            .into_iter()
            .map(|ip| PolyRef(base.0 | ip as u64))
            .collect()
    }

    fn poly_mut(&mut self, reference: PolyRef) -> Result<&mut Poly, NavMeshError> {
        let index = self.tile_index(reference).ok_or(NavMeshError::InvalidPolyRef(reference))?;
        self.tile_mut(index)
            .and_then(|t| t.data.polygons.get_mut(reference.poly() as usize))
            .ok_or(NavMeshError::InvalidPolyRef(reference))
    }

    fn tile_index(&self, reference: PolyRef) -> Option<u32> {
        let (salt, index, _) = reference.decode();
        let slot = self.slots.get(&index)?;
        (slot.tile.is_some() && slot.salt == salt).then_some(index)
    }

    pub(crate) fn tile_by_index(&self, index: u32) -> Option<&MeshTile> {
        self.slots.get(&index)?.tile.as_ref()
    }

    fn tile_mut(&mut self, index: u32) -> Option<&mut MeshTile> {
        self.slots.get_mut(&index)?.tile.as_mut()
    }

    fn tile_indices_at(&self, x: i32, y: i32) -> Vec<u32> {
        self.lookup.get(&(x, y)).cloned().unwrap_or_default()
    }

    fn neighbor_tile_indices(&self, x: i32, y: i32, side: u8) -> Vec<u32> {
        let (nx, ny) = match side {
            0 => (x + 1, y),
            1 => (x + 1, y + 1),
            2 => (x, y + 1),
            3 => (x - 1, y + 1),
            4 => (x - 1, y),
            5 => (x - 1, y - 1),
            6 => (x, y - 1),
            _ => (x + 1, y - 1),
        };
        self.tile_indices_at(nx, ny)
    }

    /// Finds the nearest ground polygon of a tile within the box around `center`.
    fn find_nearest_poly_in_tile(
        &self,
        index: u32,
        center: Vec3,
        half_extents: Vec3,
    ) -> Option<(PolyRef, Vec3)> {
        let tile = self.tile_by_index(index)?;
        let base = self.tile_ref_of(index);
        let mut nearest = None;
        let mut nearest_dist = f32::MAX;
        for ip in tile.query_polygons(center - half_extents, center + half_extents) {
            let (closest, over_poly) = tile.closest_point_on_poly(ip, center);
            let diff = center - closest;
            // Standing over a polygon within climb height counts as being on it.
            let d = if over_poly {
                let d = diff.y.abs() - tile.data.header.walkable_climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                diff.length_squared()
            };
            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((PolyRef(base.0 | ip as u64), closest));
            }
        }
        nearest
    }

    fn connect_int_links(&mut self, index: u32) {
        let base = self.tile_ref_of(index);
        let Some(tile) = self.tile_mut(index) else {
            return;
        };
        tile.links.clear();
        tile.free_link = NULL_LINK;
        tile.first_link.fill(NULL_LINK);
        for ip in 0..tile.data.polygons.len() {
            let poly = tile.data.polygons[ip].clone();
            if poly.is_off_mesh_connection() {
                continue;
            }
            // Prepending in reverse keeps the links in edge order.
            for j in (0..usize::from(poly.vertex_count)).rev() {
                let nei = poly.neighbors[j];
                if nei == 0 || nei & EXT_LINK != 0 {
                    continue;
                }
                tile.add_link(
                    ip,
                    Link {
                        reference: PolyRef(base.0 | u64::from(nei - 1)),
                        edge: j as u8,
                        ..Default::default()
                    },
                );
            }
        }
    }

    /// Connects the start of every off-mesh connection to the ground polygon below it.
    fn base_off_mesh_links(&mut self, index: u32) {
        let base = self.tile_ref_of(index);
        let Some(tile) = self.tile_by_index(index) else {
            return;
        };
        let climb = tile.data.header.walkable_climb;
        let landings: Vec<_> = tile
            .data
            .off_mesh_connections
            .iter()
            .filter_map(|con| {
                let ext = Vec3::new(con.radius, climb, con.radius);
                let (land, nearest) = self.find_nearest_poly_in_tile(index, con.start, ext)?;
                // The nearest polygon must be within the connection radius.
                if nearest.xz().distance_squared(con.start.xz()) > con.radius * con.radius {
                    return None;
                }
                Some((usize::from(con.poly), land, nearest))
            })
            .collect();

        let Some(tile) = self.tile_mut(index) else {
            return;
        };
        for (con_poly, land, nearest) in landings {
            let v = usize::from(tile.data.polygons[con_poly].vertices[0]);
            tile.data.vertices[v] = nearest;
            tile.add_link(
                con_poly,
                Link {
                    reference: land,
                    edge: 0,
                    ..Default::default()
                },
            );
            tile.add_link(
                land.poly() as usize,
                Link {
                    reference: PolyRef(base.0 | con_poly as u64),
                    edge: 0xff,
                    ..Default::default()
                },
            );
        }
    }

    /// Connects the ends of `target`'s off-mesh connections that land in `tile`.
    fn connect_ext_off_mesh_links(&mut self, index: u32, target: u32, side: Option<u8>) {
        let opposite_side = side.map_or(0xff, opposite_tile);
        let target_base = self.tile_ref_of(target);
        let Some(target_tile) = self.tile_by_index(target) else {
            return;
        };
        let landings: Vec<_> = target_tile
            .data
            .off_mesh_connections
            .iter()
            .filter(|con| con.side == opposite_side)
            // Skip connections whose start could not be connected.
            .filter(|con| target_tile.has_links(usize::from(con.poly)))
            .filter_map(|con| {
                let ext = Vec3::new(con.radius, target_tile.data.header.walkable_climb, con.radius);
                let (land, nearest) = self.find_nearest_poly_in_tile(index, con.end, ext)?;
                if nearest.xz().distance_squared(con.end.xz()) > con.radius * con.radius {
                    return None;
                }
                Some((usize::from(con.poly), con.is_bidirectional(), land, nearest))
            })
            .collect();

        for (con_poly, bidirectional, land, nearest) in landings {
            if let Some(target_tile) = self.tile_mut(target) {
                let v = usize::from(target_tile.data.polygons[con_poly].vertices[1]);
                target_tile.data.vertices[v] = nearest;
                target_tile.add_link(
                    con_poly,
                    Link {
                        reference: land,
                        edge: 1,
                        side: opposite_side,
                        ..Default::default()
                    },
                );
            }
            if !bidirectional {
                continue;
            }
            if let Some(tile) = self.tile_mut(index) {
                tile.add_link(
                    land.poly() as usize,
                    Link {
                        reference: PolyRef(target_base.0 | con_poly as u64),
                        edge: 0xff,
                        side: side.unwrap_or(0xff),
                        ..Default::default()
                    },
                );
            }
        }
    }

    /// Links the border edges of `tile` facing `side` to the matching edges of `target`.
    fn connect_ext_links(&mut self, index: u32, target: u32, side: Option<u8>) {
        let (Some(tile), Some(target_tile)) =
            (self.tile_by_index(index), self.tile_by_index(target))
        else {
            return;
        };
        let target_base = self.tile_ref_of(target);
        let mut new_links = Vec::new();
        for (ip, poly) in tile.data.polygons.iter().enumerate() {
            let nv = usize::from(poly.vertex_count);
            for j in 0..nv {
                if poly.neighbors[j] & EXT_LINK == 0 {
                    continue;
                }
                let dir = (poly.neighbors[j] & 0xff) as u8;
                if side.is_some_and(|s| s != dir) {
                    continue;
                }
                let va = tile.data.vertices[usize::from(poly.vertices[j])];
                let vb = tile.data.vertices[usize::from(poly.vertices[(j + 1) % nv])];
                for (reference, tmin, tmax) in
                    find_connecting_polys(va, vb, target_tile, target_base, opposite_tile(dir))
                {
                    let (mut lmin, mut lmax) = (0.0, 1.0);
                    // Compress the portal limits to a byte.
                    if matches!(dir, 0 | 4) {
                        lmin = (tmin - va.z) / (vb.z - va.z);
                        lmax = (tmax - va.z) / (vb.z - va.z);
                    } else if matches!(dir, 2 | 6) {
                        lmin = (tmin - va.x) / (vb.x - va.x);
                        lmax = (tmax - va.x) / (vb.x - va.x);
                    }
                    if lmin > lmax {
                        std::mem::swap(&mut lmin, &mut lmax);
                    }
                    new_links.push((
                        ip,
                        Link {
                            reference,
                            edge: j as u8,
                            side: dir,
                            bmin: (lmin.clamp(0.0, 1.0) * 255.0).round() as u8,
                            bmax: (lmax.clamp(0.0, 1.0) * 255.0).round() as u8,
                            ..Default::default()
                        },
                    ));
                }
            }
        }
        if new_links.is_empty() {
            return;
        }
        if let Some(tile) = self.tile_mut(index) {
            for (ip, link) in new_links {
                tile.add_link(ip, link);
            }
        } else {
            warn!("Tile {index} disappeared while linking");
        }
    }
}

/// Finds the polygons of `tile` with a border edge on `side` that overlaps the edge `va..vb`.
/// Returns their references with the overlap range along the edge.
fn find_connecting_polys(
    va: Vec3,
    vb: Vec3,
    tile: &MeshTile,
    base: PolyRef,
    side: u8,
) -> Vec<(PolyRef, f32, f32)> {
    const MAX_CONNECTIONS: usize = 4;
    let (amin, amax) = calc_slab_end_points(va, vb, side);
    let apos = slab_coord(va, side);
    let mut found = Vec::new();
    let edge_code = EXT_LINK | u16::from(side);
    for (ip, poly) in tile.data.polygons.iter().enumerate() {
        let nv = usize::from(poly.vertex_count);
        for j in 0..nv {
            if poly.neighbors[j] != edge_code {
                continue;
            }
            let vc = tile.data.vertices[usize::from(poly.vertices[j])];
            let vd = tile.data.vertices[usize::from(poly.vertices[(j + 1) % nv])];
            if (apos - slab_coord(vc, side)).abs() > 0.01 {
                continue;
            }
            let (bmin, bmax) = calc_slab_end_points(vc, vd, side);
            if !overlap_slabs(amin, amax, bmin, bmax, 0.01, tile.data.header.walkable_climb) {
                continue;
            }
            if found.len() < MAX_CONNECTIONS {
                found.push((PolyRef(base.0 | ip as u64), amin.x.max(bmin.x), amax.x.min(bmax.x)));
            }
            break;
        }
    }
    found
}

fn slab_coord(v: Vec3, side: u8) -> f32 {
    match side {
        0 | 4 => v.x,
        2 | 6 => v.z,
        _ => 0.0,
    }
}

/// The edge endpoints as (position along the border, height), ordered along the border.
fn calc_slab_end_points(va: Vec3, vb: Vec3, side: u8) -> (glam::Vec2, glam::Vec2) {
    let along = |v: Vec3| match side {
        0 | 4 => glam::Vec2::new(v.z, v.y),
        _ => glam::Vec2::new(v.x, v.y),
    };
    let (a, b) = (along(va), along(vb));
    if a.x < b.x { (a, b) } else { (b, a) }
}

fn overlap_slabs(
    amin: glam::Vec2,
    amax: glam::Vec2,
    bmin: glam::Vec2,
    bmax: glam::Vec2,
    px: f32,
    py: f32,
) -> bool {
    // Shrink the slabs a bit to avoid false positives from touching corners.
    let minx = (amin.x + px).max(bmin.x + px);
    let maxx = (amax.x - px).min(bmax.x - px);
    if minx > maxx {
        return false;
    }

    // Compare the heights of both edges at the ends of the overlap.
    let line = |lo: glam::Vec2, hi: glam::Vec2| {
        let d = (hi.y - lo.y) / (hi.x - lo.x);
        let k = lo.y - d * lo.x;
        (d * minx + k, d * maxx + k)
    };
    let (aminy, amaxy) = line(amin, amax);
    let (bminy, bmaxy) = line(bmin, bmax);
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    // Crossing edges always overlap.
    if dmin * dmax < 0.0 {
        return true;
    }
    let threshold = (py * 2.0) * (py * 2.0);
    dmin * dmin <= threshold || dmax * dmax <= threshold
}

/// Errors that can occur while managing a [`NavMesh`].
#[derive(Debug, Error)]
pub enum NavMeshError {
    /// The grid parameters are out of range.
    #[error("Invalid navmesh parameters: {0}")]
    InvalidParams(&'static str),
    /// The tile data could not be parsed.
    #[error(transparent)]
    TileData(#[from] TileDataError),
    /// Every tile slot is in use.
    #[error("No free tile slot left")]
    OutOfTiles,
    /// A tile already occupies the location.
    #[error("A tile already exists at ({x}, {y}) layer {layer}")]
    TileAlreadyExists {
        /// Tile x
        x: i32,
        /// Tile y
        y: i32,
        /// Tile layer
        layer: i32,
    },
    /// The tile has more polygons than a tile of this navmesh may hold.
    #[error("The tile has {polygons} polygons, at most {max} are allowed")]
    TooManyPolygons {
        /// Polygons in the tile
        polygons: usize,
        /// The limit
        max: usize,
    },
    /// The reference does not point at a loaded tile or a free slot it can be restored into.
    #[error("Invalid tile reference {0}")]
    InvalidTileRef(PolyRef),
    /// The reference does not point at a polygon of a loaded tile.
    #[error("Invalid polygon reference {0}")]
    InvalidPolyRef(PolyRef),
    /// The polygon is a ground polygon.
    #[error("Polygon {0} is not an off-mesh connection")]
    NotAnOffMeshConnection(PolyRef),
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::U16Vec3;

    use super::*;
    use crate::{NavMeshCreateParams, OffMeshConnectionParams, create_nav_mesh_data};

    const N: u16 = 0xffff;

    /// A 4x4 cell square tile made of two quads at grid location `(tx, 0)`, with portals on its
    /// -x and +x borders.
    fn strip_tile(tx: i32) -> MeshTileData {
        let origin = Vec3::new(tx as f32 * 4.0, 0.0, 0.0);
        let params = NavMeshCreateParams {
            vertices: vec![
                U16Vec3::new(0, 0, 0),
                U16Vec3::new(0, 0, 4),
                U16Vec3::new(2, 0, 4),
                U16Vec3::new(2, 0, 0),
                U16Vec3::new(4, 0, 4),
                U16Vec3::new(4, 0, 0),
            ],
            #[rustfmt::skip]
            polygons: vec![
                0, 1, 2, 3, N, N,   0x8000, N, 1, N, N, N,
                3, 2, 4, 5, N, N,   0, N, 0x8002, N, N, N,
            ],
            poly_flags: vec![1, 1],
            poly_areas: vec![0, 0],
            max_vertices_per_polygon: 6,
            tile_x: tx,
            bmin: origin,
            bmax: origin + Vec3::new(4.0, 1.0, 4.0),
            walkable_height: 2.0,
            walkable_radius: 0.5,
            walkable_climb: 0.5,
            cell_size: 1.0,
            cell_height: 0.5,
            build_bv_tree: true,
            ..Default::default()
        };
        create_nav_mesh_data(&params).unwrap()
    }

    fn grid(max_tiles: u32) -> NavMesh {
        NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 4.0,
            tile_height: 4.0,
            max_tiles,
            max_polys: 16,
        })
        .unwrap()
    }

    #[test]
    fn internal_links_follow_neighbors() {
        let nav_mesh = NavMesh::from_single_tile(&strip_tile(0).to_bytes()).unwrap();
        let (tile_ref, tile) = nav_mesh.tiles().next().unwrap();
        let links: Vec<_> = tile.links(0).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].reference, PolyRef(tile_ref.0 | 1));
        assert_eq!(links[0].edge, 2);
        assert_eq!(links[0].side, 0xff);
    }

    #[test]
    fn neighboring_tiles_are_linked_both_ways() {
        let mut nav_mesh = grid(4);
        let left = nav_mesh.add_tile(&strip_tile(0).to_bytes(), None).unwrap();
        let right = nav_mesh.add_tile(&strip_tile(1).to_bytes(), None).unwrap();

        let left_tile = nav_mesh.tile_by_ref(left).unwrap();
        let across: Vec<_> = left_tile.links(1).filter(|l| l.side == 0).collect();
        assert_eq!(across.len(), 1);
        assert_eq!(across[0].reference, PolyRef(right.0));
        assert_eq!((across[0].bmin, across[0].bmax), (0, 255));

        let right_tile = nav_mesh.tile_by_ref(right).unwrap();
        assert!(right_tile.links(0).any(|l| l.side == 4 && l.reference == PolyRef(left.0 | 1)));
    }

    #[test]
    fn removing_a_tile_unlinks_and_invalidates_it() {
        let mut nav_mesh = grid(4);
        let left = nav_mesh.add_tile(&strip_tile(0).to_bytes(), None).unwrap();
        let right = nav_mesh.add_tile(&strip_tile(1).to_bytes(), None).unwrap();
        nav_mesh.set_poly_flags(PolyRef(right.0 | 1), 0x10).unwrap();

        let bytes = nav_mesh.remove_tile(right).unwrap();
        assert!(!nav_mesh.is_valid_poly_ref(right));
        assert!(nav_mesh.tile_by_ref(left).unwrap().links(1).all(|l| l.side == 0xff));
        assert_eq!(MeshTileData::from_bytes(&bytes).unwrap().polygons[1].flags, 0x10);

        // Restoring into the old slot keeps the old references valid.
        let restored = nav_mesh.add_tile(&bytes, Some(right)).unwrap();
        assert_eq!(restored, right);
        let reused = nav_mesh.remove_tile(restored).unwrap();
        let fresh = nav_mesh.add_tile(&reused, None).unwrap();
        assert_ne!(fresh, right);
    }

    #[test]
    fn occupied_locations_are_rejected() {
        let mut nav_mesh = grid(4);
        nav_mesh.add_tile(&strip_tile(0).to_bytes(), None).unwrap();
        assert!(matches!(
            nav_mesh.add_tile(&strip_tile(0).to_bytes(), None),
            Err(NavMeshError::TileAlreadyExists { x: 0, y: 0, layer: 0 })
        ));
    }

    #[test]
    fn slots_run_out() {
        let mut nav_mesh = grid(1);
        nav_mesh.add_tile(&strip_tile(0).to_bytes(), None).unwrap();
        assert!(matches!(
            nav_mesh.add_tile(&strip_tile(1).to_bytes(), None),
            Err(NavMeshError::OutOfTiles)
        ));
    }

    #[test]
    fn huge_grids_allocate_slots_on_demand() {
        let mut nav_mesh = grid(1 << TILE_BITS);
        assert!(nav_mesh.slots.is_empty());
        let restored = PolyRef::encode(7, 1000, 0);
        assert_eq!(nav_mesh.add_tile(&strip_tile(0).to_bytes(), Some(restored)).unwrap(), restored);
        let fresh = nav_mesh.add_tile(&strip_tile(1).to_bytes(), None).unwrap();
        assert_eq!(fresh.tile(), 0);
        assert_eq!(nav_mesh.slots.len(), 2);
    }

    #[test]
    fn restored_references_must_fit_the_grid() {
        let mut nav_mesh = grid(4);
        let outside = PolyRef::encode(1, 4, 0);
        assert!(matches!(
            nav_mesh.add_tile(&strip_tile(0).to_bytes(), Some(outside)),
            Err(NavMeshError::InvalidTileRef(_))
        ));
        let taken = nav_mesh.add_tile(&strip_tile(0).to_bytes(), None).unwrap();
        assert!(matches!(
            nav_mesh.add_tile(&strip_tile(1).to_bytes(), Some(taken)),
            Err(NavMeshError::InvalidTileRef(_))
        ));
    }

    #[test]
    fn heights_and_closest_points() {
        let nav_mesh = NavMesh::from_single_tile(&strip_tile(0).to_bytes()).unwrap();
        let (tile_ref, _) = nav_mesh.tiles().next().unwrap();
        let poly = PolyRef(tile_ref.0 | 1);
        assert_relative_eq!(
            nav_mesh.get_poly_height(poly, Vec3::new(3.0, 7.0, 1.0)).unwrap().unwrap(),
            0.0
        );
        assert_eq!(nav_mesh.get_poly_height(poly, Vec3::new(1.0, 0.0, 1.0)).unwrap(), None);

        let (closest, over) = nav_mesh
            .closest_point_on_poly(poly, Vec3::new(1.0, 0.0, 1.0))
            .unwrap();
        assert!(!over);
        assert_relative_eq!(closest.x, 2.0);
        assert_relative_eq!(closest.z, 1.0);
    }

    #[test]
    fn tile_lookup_by_location() {
        let mut nav_mesh = grid(4);
        let r = nav_mesh.add_tile(&strip_tile(1).to_bytes(), None).unwrap();
        assert_eq!(nav_mesh.tile_ref_at(1, 0, 0), Some(r));
        assert!(nav_mesh.tile_at(0, 0, 0).is_none());
        assert_eq!(nav_mesh.calc_tile_loc(Vec3::new(5.0, 0.0, 1.0)), (1, 0));
        assert_eq!(nav_mesh.tiles_at(1, 0).len(), 1);
    }

    #[test]
    fn off_mesh_connections_link_both_ends() {
        let params = NavMeshCreateParams {
            vertices: vec![
                U16Vec3::new(0, 0, 0),
                U16Vec3::new(0, 0, 4),
                U16Vec3::new(2, 0, 4),
                U16Vec3::new(2, 0, 0),
                U16Vec3::new(4, 0, 4),
                U16Vec3::new(4, 0, 0),
            ],
            #[rustfmt::skip]
            polygons: vec![
                0, 1, 2, 3, N, N,   N, N, 1, N, N, N,
                3, 2, 4, 5, N, N,   0, N, N, N, N, N,
            ],
            poly_flags: vec![1, 1],
            poly_areas: vec![0, 0],
            max_vertices_per_polygon: 6,
            off_mesh_connections: vec![OffMeshConnectionParams {
                start: Vec3::new(0.5, 0.0, 0.5),
                end: Vec3::new(3.5, 0.0, 3.5),
                radius: 0.4,
                bidirectional: true,
                area: 5,
                flags: 8,
                user_id: 1,
            }],
            bmax: Vec3::new(4.0, 1.0, 4.0),
            walkable_climb: 0.5,
            cell_size: 1.0,
            cell_height: 0.5,
            ..Default::default()
        };
        let data = create_nav_mesh_data(&params).unwrap();

        let nav_mesh = NavMesh::from_single_tile(&data.to_bytes()).unwrap();
        let (tile_ref, tile) = nav_mesh.tiles().next().unwrap();
        let con = PolyRef(tile_ref.0 | 2);
        let con_links: Vec<_> = tile.links(2).map(|l| (l.reference, l.edge)).collect();
        assert!(con_links.contains(&(PolyRef(tile_ref.0), 0)));
        assert!(con_links.contains(&(PolyRef(tile_ref.0 | 1), 1)));
        // Bidirectional connections can be entered from either end.
        assert!(tile.links(0).any(|l| l.reference == con));
        assert!(tile.links(1).any(|l| l.reference == con));

        let (start, end) = nav_mesh
            .off_mesh_connection_end_points(PolyRef(tile_ref.0), con)
            .unwrap();
        assert_relative_eq!(start.x, 0.5);
        assert_relative_eq!(end.x, 3.5);
        let (start, end) = nav_mesh
            .off_mesh_connection_end_points(PolyRef(tile_ref.0 | 1), con)
            .unwrap();
        assert_relative_eq!(start.x, 3.5);
        assert_relative_eq!(end.x, 0.5);
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 1.0,
            tile_height: 1.0,
            max_tiles: 0,
            max_polys: 1,
        })
        .is_err());
    }
}
