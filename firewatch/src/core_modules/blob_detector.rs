// THEORY:
// The `BlobDetector` is the spatial grouping layer of the colour detector. It takes
// the per-chunk "heat" (the fire-coloured fraction of each chunk) and finds spatially
// coherent hot areas.
//
// Algorithm steps:
// 1.  **Heatmap**: The flat heat vector is viewed as a grid_width x grid_height map.
// 2.  **Seeding**: Every chunk at or above `grow_threshold` is a seed, hottest first.
//     A seed already swallowed by an earlier region is skipped, so each connected
//     hot area is grown exactly once, from its hottest chunk.
// 3.  **Region Growing**: From each unvisited seed the region expands through the 4
//     direct neighbours while their heat stays at or above `grow_threshold`.
//     Diagonal contact does not connect two areas.
// 4.  **Aggregation**: Each grown region reports its bounding box in chunk
//     coordinates, its size and its mean heat.
// 5.  **Stateless Utility**: `find_blobs` looks at one frame only. It has no memory.

pub mod blob_detector {
    /// A chunk-grid coordinate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Point {
        pub x: u32,
        pub y: u32,
    }

    /// A connected hot area of the chunk grid.
    #[derive(Debug, Clone, PartialEq)]
    pub struct FireBlob {
        /// Inclusive top-left and bottom-right chunk coordinates.
        pub bounding_box: (Point, Point),
        pub size_in_chunks: usize,
        pub mean_heat: f32,
    }

    pub fn find_blobs(heat: &[f32], grid_width: u32, grid_height: u32, grow_threshold: f32) -> Vec<FireBlob> {
        let (w, h) = (grid_width as usize, grid_height as usize);
        if w == 0 || h == 0 || heat.len() < w * h {
            return Vec::new();
        }
        let at = |x: usize, y: usize| heat[y * w + x];

        // --- 1. Seeding ---
        let mut seeds: Vec<Point> = (0..h)
            .flat_map(|y| (0..w).map(move |x| Point { x: x as u32, y: y as u32 }))
            .filter(|p| at(p.x as usize, p.y as usize) >= grow_threshold)
            .collect();
        seeds.sort_by(|a, b| at(b.x as usize, b.y as usize).total_cmp(&at(a.x as usize, a.y as usize)));

        // --- 2. Region Growing ---
        let mut visited = vec![false; w * h];
        let mut blobs = Vec::new();
        for seed in seeds {
            let index = seed.y as usize * w + seed.x as usize;
            if visited[index] {
                continue;
            }
            visited[index] = true;

            let mut region = Vec::new();
            let mut queue = vec![seed];
            while let Some(current) = queue.pop() {
                region.push(current);
                for (dx, dy) in [(0i64, 1i64), (0, -1), (1, 0), (-1, 0)] {
                    let nx = current.x as i64 + dx;
                    let ny = current.y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let (nx, ny) = (nx as usize, ny as usize);
                    let next = ny * w + nx;
                    if !visited[next] && heat[next] >= grow_threshold {
                        visited[next] = true;
                        queue.push(Point { x: nx as u32, y: ny as u32 });
                    }
                }
            }

            // --- 3. Aggregation ---
            blobs.push(aggregate(&region, |p| at(p.x as usize, p.y as usize)));
        }

        blobs
    }

    fn aggregate(region: &[Point], heat_at: impl Fn(&Point) -> f32) -> FireBlob {
        let mut min = Point { x: u32::MAX, y: u32::MAX };
        let mut max = Point { x: 0, y: 0 };
        let mut total = 0.0;
        for p in region {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            total += heat_at(p);
        }
        let size = region.len();
        FireBlob {
            bounding_box: (min, max),
            size_in_chunks: size,
            mean_heat: total / size as f32,
        }
    }
}
