//! Region bookkeeping shared by the partitioners: painting the tile border,
//! tracing region neighborhoods, merging small regions and compacting the ids.

use std::collections::VecDeque;

use crate::{AreaType, CompactHeightfield, RegionId, region::RegionError};

#[derive(Debug, Clone)]
struct RegionData {
    /// Number of spans belonging to this region
    span_count: usize,
    /// The id the region will be remapped to
    id: RegionId,
    area: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    connects_to_border: bool,
    y_min: u16,
    y_max: u16,
    /// Neighboring regions in contour order. [`RegionId::NONE`] stands for a solid edge.
    connections: Vec<RegionId>,
    /// Regions stacked above or below this one.
    floors: Vec<RegionId>,
}

impl RegionData {
    fn new(id: usize) -> Self {
        Self {
            span_count: 0,
            id: RegionId::from(id as u16),
            area: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            y_min: u16::MAX,
            y_max: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    /// Skips unused, removed and border regions.
    #[inline]
    fn is_live(&self) -> bool {
        self.id != RegionId::NONE && !self.id.is_border()
    }

    fn remove_adjacent_neighbors(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbor(&mut self, old_id: RegionId, new_id: RegionId) {
        let mut neighbor_changed = false;
        for connection in self.connections.iter_mut().filter(|c| **c == old_id) {
            *connection = new_id;
            neighbor_changed = true;
        }
        for floor in self.floors.iter_mut().filter(|f| **f == old_id) {
            *floor = new_id;
        }
        if neighbor_changed {
            self.remove_adjacent_neighbors();
        }
    }

    fn can_merge_with(&self, other: &RegionData) -> bool {
        if self.area != other.area {
            return false;
        }
        let shared_edges = self.connections.iter().filter(|c| **c == other.id).count();
        if shared_edges > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn add_unique_floor(&mut self, floor: RegionId) {
        if !self.floors.contains(&floor) {
            self.floors.push(floor);
        }
    }

    fn add_unique_connection(&mut self, connection: RegionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    fn is_connected_to_border(&self) -> bool {
        // Solid edges are stored as the null region.
        self.connections.contains(&RegionId::NONE)
    }
}

/// Merges region `source` into region `target`, splicing their contours at the shared edge.
fn merge_regions(regions: &mut [RegionData], target: usize, source: usize) -> bool {
    let a_id = regions[target].id;
    let b_id = regions[source].id;
    let a_connections = regions[target].connections.clone();
    let b_connections = regions[source].connections.clone();

    // Find insertion points.
    let Some(insert_a) = a_connections.iter().position(|c| *c == b_id) else {
        return false;
    };
    let Some(insert_b) = b_connections.iter().position(|c| *c == a_id) else {
        return false;
    };

    let mut connections = Vec::with_capacity(a_connections.len() + b_connections.len());
    let na = a_connections.len();
    connections.extend((0..na - 1).map(|i| a_connections[(insert_a + 1 + i) % na]));
    let nb = b_connections.len();
    connections.extend((0..nb - 1).map(|i| b_connections[(insert_b + 1 + i) % nb]));

    let floors = regions[source].floors.clone();
    let span_count = regions[source].span_count;
    regions[source].span_count = 0;
    regions[source].connections.clear();

    let target = &mut regions[target];
    target.connections = connections;
    target.remove_adjacent_neighbors();
    for floor in floors {
        target.add_unique_floor(floor);
    }
    target.span_count += span_count;
    true
}

/// Gives the surviving regions consecutive ids starting at 1. Returns the highest id.
///
/// Ids that ended up without any spans, such as the slots of the border regions, are dropped.
fn compress_region_ids(regions: &mut [RegionData]) -> u16 {
    let max_id = regions
        .iter()
        .filter(|region| region.is_live())
        .map(|region| region.id.index())
        .max()
        .unwrap_or_default();
    let mut populated = vec![false; max_id + 1];
    for region in regions.iter().filter(|r| r.is_live() && r.span_count > 0) {
        populated[region.id.index()] = true;
    }
    for region in regions.iter_mut() {
        region.remap = region.is_live() && populated[region.id.index()];
        if region.is_live() && !region.remap {
            region.id = RegionId::NONE;
        }
    }
    let mut next_id = 0_u16;
    for i in 0..regions.len() {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        next_id += 1;
        let new_id = RegionId::from(next_id);
        for region in regions[i..].iter_mut().filter(|r| r.id == old_id) {
            region.id = new_id;
            region.remap = false;
        }
    }
    next_id
}

fn remap_spans(regions: &[RegionData], src_reg: &mut [RegionId]) {
    for region in src_reg.iter_mut().filter(|r| !r.is_border()) {
        *region = regions[region.index()].id;
    }
}

impl CompactHeightfield {
    pub(crate) fn paint_rect_region(
        &self,
        min_x: u16,
        max_x: u16,
        min_z: u16,
        max_z: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Paints the four border strips with their own border regions and records the border size.
    /// `next_id` is advanced past the ids used.
    pub(crate) fn paint_border_regions(
        &mut self,
        border_size: u16,
        src_reg: &mut [RegionId],
        next_id: &mut u16,
    ) {
        if border_size > 0 {
            // Make sure border will not overflow.
            let bw = border_size.min(self.width);
            let bh = border_size.min(self.height);
            let (w, h) = (self.width, self.height);
            for (min_x, max_x, min_z, max_z) in
                [(0, bw, 0, h), (w - bw, w, 0, h), (0, w, 0, bh), (0, w, h - bh, h)]
            {
                let region = RegionId::from(*next_id) | RegionId::BORDER_REGION;
                self.paint_rect_region(min_x, max_x, min_z, max_z, region, src_reg);
                *next_id += 1;
            }
        }
        self.border_size = border_size;
    }

    fn is_solid_edge(&self, src_reg: &[RegionId], x: u16, z: u16, i: usize, dir: u8) -> bool {
        let neighbor_region = self
            .neighbor_index(x, z, i, dir)
            .map_or(RegionId::NONE, |a_i| src_reg[a_i]);
        neighbor_region != src_reg[i]
    }

    /// Walks the boundary of the region of span `i`, collecting the neighboring region of every
    /// edge.
    fn walk_region_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
        connections: &mut Vec<RegionId>,
    ) {
        let start_dir = dir;
        let start_i = i;

        let mut current_region = self
            .neighbor_index(x, z, i, dir)
            .map_or(RegionId::NONE, |a_i| src_reg[a_i]);
        connections.push(current_region);

        for _ in 0..40_000 {
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                // Choose the edge corner
                let region = self
                    .neighbor_index(x, z, i, dir)
                    .map_or(RegionId::NONE, |a_i| src_reg[a_i]);
                if region != current_region {
                    current_region = region;
                    connections.push(current_region);
                }
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some(con) = self.spans[i].con(dir) else {
                    // Should not happen.
                    return;
                };
                let (n_x, n_z, n_i) = self.con_indices(x as i32, z as i32, dir, con);
                x = n_x as u16;
                z = n_z as u16;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        if connections.len() > 1 {
            let mut j = 0;
            while j < connections.len() {
                let nj = (j + 1) % connections.len();
                if connections[j] == connections[nj] && connections.len() > 1 {
                    connections.remove(j);
                } else {
                    j += 1;
                }
            }
        }
    }

    /// Removes regions smaller than `min_region_area` and merges regions smaller than
    /// `merge_region_size` into their smallest compatible neighbor.
    ///
    /// Returns the ids of regions that were found to overlap themselves.
    pub(crate) fn merge_and_filter_regions(
        &self,
        min_region_area: usize,
        merge_region_size: usize,
        max_region_id: &mut u16,
        src_reg: &mut [RegionId],
    ) -> Vec<RegionId> {
        let region_count = *max_region_id as usize + 1;
        let mut regions: Vec<RegionData> = (0..region_count).map(RegionData::new).collect();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let r = src_reg[i];
                    if r == RegionId::NONE || r.index() >= region_count {
                        continue;
                    }
                    let region = &mut regions[r.index()];
                    region.span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor = src_reg[j];
                        if floor == RegionId::NONE || floor.index() >= region_count {
                            continue;
                        }
                        if floor == r {
                            region.overlap = true;
                        }
                        region.add_unique_floor(floor);
                    }

                    // Have found contour
                    if !region.connections.is_empty() {
                        continue;
                    }
                    region.area = self.areas[i];

                    // Check if this cell is next to a border.
                    let Some(dir) = (0..4).find(|&dir| self.is_solid_edge(src_reg, x, z, i, dir))
                    else {
                        continue;
                    };
                    // The cell is at border.
                    // Walk around the contour to find all the neighbours.
                    let mut connections = Vec::new();
                    self.walk_region_contour(x, z, i, dir, src_reg, &mut connections);
                    regions[r.index()].connections = connections;
                }
            }
        }

        // Remove too small regions.
        let mut stack: Vec<usize> = Vec::with_capacity(32);
        let mut trace: Vec<usize> = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &regions[i];
            if !region.is_live() || region.span_count == 0 || region.visited {
                continue;
            }

            // Count the total size of all the connected regions.
            // Also keep track of the regions connects to a tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);

            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);

                for j in 0..regions[ri].connections.len() {
                    let connection = regions[ri].connections[j];
                    if connection.is_border() {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection.index()];
                    if neighbor.visited || !neighbor.is_live() {
                        continue;
                    }
                    // Visit
                    stack.push(neighbor.id.index());
                    neighbor.visited = true;
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Do not remove areas which connect to tile borders
            // as their size cannot be estimated correctly and removing them
            // can potentially remove necessary areas.
            if span_count < min_region_area && !connects_to_border {
                // Kill all visited regions.
                for &t in &trace {
                    regions[t].span_count = 0;
                    regions[t].id = RegionId::NONE;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if !region.is_live() || region.overlap || region.span_count == 0 {
                    continue;
                }

                // Check to see if the region should be merged.
                if region.span_count > merge_region_size && region.is_connected_to_border() {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find smallest neighbour region that connects to this one.
                let mut smallest = usize::MAX;
                let mut merge_id = region.id;
                for connection in &region.connections {
                    if connection.is_border() {
                        continue;
                    }
                    let candidate = &regions[connection.index()];
                    if !candidate.is_live() || candidate.overlap {
                        continue;
                    }
                    if candidate.span_count < smallest
                        && region.can_merge_with(candidate)
                        && candidate.can_merge_with(region)
                    {
                        smallest = candidate.span_count;
                        merge_id = candidate.id;
                    }
                }

                // Found new id.
                if merge_id != region.id {
                    let old_id = region.id;
                    // Merge neighbours.
                    if merge_regions(&mut regions, merge_id.index(), i) {
                        // Fixup regions pointing to current region.
                        for other in regions.iter_mut().filter(|r| r.is_live()) {
                            // If another region was already merged into current region
                            // change the nid of the previous region too.
                            if other.id == old_id {
                                other.id = merge_id;
                            }
                            // Replace the current region with the new one if the
                            // current regions is neighbour.
                            other.replace_neighbor(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compress region Ids.
        *max_region_id = compress_region_ids(&mut regions);

        // Remap regions.
        remap_spans(&regions, src_reg);

        // Return regions that we found to be overlapping.
        regions
            .iter()
            .filter(|region| region.overlap)
            .map(|region| region.id)
            .collect()
    }

    /// Merges monotone regions into non-overlapping layers and removes layers smaller than
    /// `min_region_area`.
    pub(crate) fn merge_and_filter_layer_regions(
        &self,
        min_region_area: usize,
        max_region_id: &mut u16,
        src_reg: &mut [RegionId],
    ) {
        let region_count = *max_region_id as usize + 1;
        let mut regions: Vec<RegionData> = (0..region_count).map(RegionData::new).collect();

        // Find region neighbours and overlapping regions.
        let mut layer_regions: Vec<RegionId> = Vec::with_capacity(32);
        for z in 0..self.height {
            for x in 0..self.width {
                layer_regions.clear();
                for i in self.cell_at(x, z).index_range() {
                    let ri = src_reg[i];
                    if ri == RegionId::NONE || ri.index() >= region_count {
                        continue;
                    }
                    let span_y = self.spans[i].y;
                    let region = &mut regions[ri.index()];
                    region.span_count += 1;
                    region.area = self.areas[i];
                    region.y_min = region.y_min.min(span_y);
                    region.y_max = region.y_max.max(span_y);

                    // Collect all region layers.
                    layer_regions.push(ri);

                    // Update neighbours
                    for dir in 0..4 {
                        let Some(a_i) = self.neighbor_index(x, z, i, dir) else {
                            continue;
                        };
                        let rai = src_reg[a_i];
                        if rai != RegionId::NONE && rai.index() < region_count && rai != ri {
                            region.add_unique_connection(rai);
                        }
                        if rai.is_border() {
                            region.connects_to_border = true;
                        }
                    }
                }

                // Update overlapping regions.
                for (a, &ra) in layer_regions.iter().enumerate() {
                    for &rb in &layer_regions[a + 1..] {
                        if ra != rb {
                            regions[ra.index()].add_unique_floor(rb);
                            regions[rb.index()].add_unique_floor(ra);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        let mut layer_id = 1_u16;
        for region in regions.iter_mut() {
            region.id = RegionId::NONE;
        }

        // Merge monotone regions to create non-overlapping areas.
        let mut queue: VecDeque<usize> = VecDeque::with_capacity(32);
        for root in 1..region_count {
            // Skip already visited.
            if regions[root].id != RegionId::NONE {
                continue;
            }

            // Start search.
            regions[root].id = RegionId::from(layer_id);
            queue.clear();
            queue.push_back(root);

            while let Some(current) = queue.pop_front() {
                for j in 0..regions[current].connections.len() {
                    let neighbor = regions[current].connections[j].index();
                    // Skip already visited.
                    if regions[neighbor].id != RegionId::NONE {
                        continue;
                    }
                    // Skip if different area type, do not connect regions with different area type.
                    if regions[current].area != regions[neighbor].area {
                        continue;
                    }
                    // Skip if the neighbour is overlapping root region.
                    if regions[root].floors.contains(&RegionId::from(neighbor as u16)) {
                        continue;
                    }

                    // Deepen
                    queue.push_back(neighbor);

                    // Mark layer id
                    regions[neighbor].id = RegionId::from(layer_id);
                    // Merge current layers to root.
                    let floors = regions[neighbor].floors.clone();
                    let (y_min, y_max) = (regions[neighbor].y_min, regions[neighbor].y_max);
                    let span_count = std::mem::take(&mut regions[neighbor].span_count);
                    let connects_to_border = regions[neighbor].connects_to_border;
                    let root_region = &mut regions[root];
                    for floor in floors {
                        root_region.add_unique_floor(floor);
                    }
                    root_region.y_min = root_region.y_min.min(y_min);
                    root_region.y_max = root_region.y_max.max(y_max);
                    root_region.span_count += span_count;
                    root_region.connects_to_border |= connects_to_border;
                }
            }

            layer_id += 1;
        }

        // Remove small regions
        for i in 0..region_count {
            let region = &regions[i];
            if region.span_count > 0
                && region.span_count < min_region_area
                && !region.connects_to_border
            {
                let id = region.id;
                for other in regions.iter_mut().filter(|r| r.id == id) {
                    other.id = RegionId::NONE;
                }
            }
        }

        // Compress region Ids.
        *max_region_id = compress_region_ids(&mut regions);

        // Remap regions.
        remap_spans(&regions, src_reg);
    }

    /// Stores the partition result on the spans.
    pub(crate) fn store_regions(&mut self, src_reg: &[RegionId], max_region_id: u16) {
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = *region;
        }
        self.max_region = RegionId::from(max_region_id);
    }
}

/// Advances a region id counter, failing before it runs into the border flag.
#[inline]
pub(crate) fn next_region_id(id: &mut u16) -> Result<RegionId, RegionError> {
    if *id >= RegionId::BORDER_REGION.bits() - 1 {
        return Err(RegionError::RegionIdOverflow);
    }
    let current = RegionId::from(*id);
    *id += 1;
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: usize, connections: &[u16]) -> RegionData {
        let mut region = RegionData::new(id);
        region.connections = connections.iter().map(|c| RegionId::from(*c)).collect();
        region.span_count = 1;
        region
    }

    #[test]
    fn adjacent_duplicates_collapse() {
        let mut region = region(1, &[2, 2, 3, 0, 0, 2]);
        region.remove_adjacent_neighbors();
        let connections: Vec<u16> = region.connections.iter().map(|c| c.bits()).collect();
        assert_eq!(connections, vec![2, 3, 0]);
    }

    #[test]
    fn merging_splices_contours() {
        let mut regions = vec![
            RegionData::new(0),
            region(1, &[0, 2]),
            region(2, &[0, 1, 3]),
            region(3, &[2]),
        ];
        assert!(merge_regions(&mut regions, 2, 1));
        assert_eq!(regions[2].span_count, 2);
        assert_eq!(regions[1].span_count, 0);
        assert!(regions[1].connections.is_empty());
        assert!(!regions[2].connections.contains(&RegionId::from(1)));
        assert!(regions[2].connections.contains(&RegionId::from(3)));
    }

    #[test]
    fn merge_requires_shared_edge() {
        let mut regions = vec![RegionData::new(0), region(1, &[0]), region(2, &[0])];
        assert!(!merge_regions(&mut regions, 2, 1));
    }

    #[test]
    fn compress_gives_consecutive_ids() {
        let mut regions: Vec<RegionData> = (0..5).map(RegionData::new).collect();
        for region in regions.iter_mut().skip(1) {
            region.span_count = 1;
        }
        regions[2].id = RegionId::NONE;
        regions[4].id = RegionId::from(1);
        let max = compress_region_ids(&mut regions);
        assert_eq!(max, 2);
        let ids: Vec<u16> = regions.iter().map(|r| r.id.bits()).collect();
        assert_eq!(ids, vec![0, 1, 0, 2, 1]);
    }

    #[test]
    fn empty_regions_are_dropped() {
        let mut regions: Vec<RegionData> = (0..4).map(RegionData::new).collect();
        regions[3].span_count = 7;
        assert_eq!(compress_region_ids(&mut regions), 1);
        assert_eq!(regions[1].id, RegionId::NONE);
        assert_eq!(regions[3].id, RegionId::from(1));
    }

    #[test]
    fn region_ids_stop_before_border_flag() {
        let mut id = RegionId::BORDER_REGION.bits() - 2;
        assert!(next_region_id(&mut id).is_ok());
        assert!(matches!(
            next_region_id(&mut id),
            Err(RegionError::RegionIdOverflow)
        ));
    }
}
