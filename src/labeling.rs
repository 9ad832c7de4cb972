use geo::{Contains, Intersects, MultiPolygon, Point, Rect};

/// Quadtree over labelled polygons for fast point-in-region candidate lookup.
///
/// Each leaf keeps the labels whose polygons touch its box; the exact
/// containment test is left to the caller's polygons.
pub struct LabeledPartitionTree<T> {
    children: Vec<LabeledPartitionTree<T>>,
    labels: Vec<T>,
    bbox: Rect<f64>,
}

/// The whole lon/lat plane.
pub fn world_bbox() -> Rect<f64> {
    Rect::new(Point::new(-180.0, -90.0), Point::new(180.0, 90.0))
}

fn overlaps(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

fn covers(bbox: &Rect<f64>, point: &Point<f64>) -> bool {
    point.x() >= bbox.min().x
        && point.x() <= bbox.max().x
        && point.y() >= bbox.min().y
        && point.y() <= bbox.max().y
}

/// Bounding box of a multipolygon, `None` when it has no coordinates.
pub fn bounding_box(polygon: &MultiPolygon<f64>) -> Option<Rect<f64>> {
    let mut coords = polygon
        .iter()
        .flat_map(|part| std::iter::once(part.exterior()).chain(part.interiors()))
        .flat_map(|ring| ring.coords());
    let first = coords.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for c in coords {
        min_x = min_x.min(c.x);
        min_y = min_y.min(c.y);
        max_x = max_x.max(c.x);
        max_y = max_y.max(c.y);
    }
    Some(Rect::new(Point::new(min_x, min_y), Point::new(max_x, max_y)))
}

impl<T: Clone + PartialEq> LabeledPartitionTree<T> {
    /// Build a tree from `(label, polygon)` pairs down to `max_depth` levels.
    pub fn from_labeled_polygons(
        polygons: &[(T, &MultiPolygon<f64>)],
        bbox: Rect<f64>,
        max_depth: usize,
    ) -> LabeledPartitionTree<T> {
        let boxed: Vec<(T, &MultiPolygon<f64>, Rect<f64>)> = polygons
            .iter()
            .filter_map(|(label, polygon)| {
                bounding_box(polygon).map(|rect| (label.clone(), *polygon, rect))
            })
            .collect();
        let selected: Vec<usize> = (0..boxed.len()).collect();
        Self::build(&boxed, &selected, bbox, max_depth, 0)
    }

    fn build(
        polygons: &[(T, &MultiPolygon<f64>, Rect<f64>)],
        selected: &[usize],
        bbox: Rect<f64>,
        max_depth: usize,
        depth: usize,
    ) -> LabeledPartitionTree<T> {
        let children = if selected.is_empty() || depth == max_depth {
            vec![]
        } else {
            let [ab, cd] = bbox.split_x();
            let [a, b] = ab.split_y();
            let [c, d] = cd.split_y();

            [a, b, c, d]
                .into_iter()
                .map(|child_bbox| {
                    let child_selected: Vec<usize> = selected
                        .iter()
                        .copied()
                        .filter(|&i| {
                            let (_, polygon, rect) = &polygons[i];
                            overlaps(&child_bbox, rect) && child_bbox.intersects(*polygon)
                        })
                        .collect();
                    Self::build(polygons, &child_selected, child_bbox, max_depth, depth + 1)
                })
                .collect()
        };

        let labels = selected.iter().map(|&i| polygons[i].0.clone()).collect();
        LabeledPartitionTree {
            children,
            labels,
            bbox,
        }
    }

    /// Labels whose polygons may contain `point`, without duplicates.
    pub fn get_candidate_labels(&self, point: &Point<f64>) -> Vec<T> {
        let mut candidates = Vec::new();
        self.collect_candidates(point, &mut candidates);
        candidates
    }

    fn collect_candidates(&self, point: &Point<f64>, out: &mut Vec<T>) {
        if self.children.is_empty() {
            for label in &self.labels {
                if !out.contains(label) {
                    out.push(label.clone());
                }
            }
        } else {
            // Points on a split line are covered by both halves.
            self.children
                .iter()
                .filter(|child| covers(&child.bbox, point))
                .for_each(|child| child.collect_candidates(point, out));
        }
    }

    /// Every label whose polygon strictly contains `point`.
    pub fn containing_labels<'a, F>(&self, point: &Point<f64>, polygon_for: F) -> Vec<T>
    where
        F: Fn(&T) -> Option<&'a MultiPolygon<f64>>,
    {
        self.get_candidate_labels(point)
            .into_iter()
            .filter(|candidate| {
                polygon_for(candidate)
                    .map(|polygon| polygon.contains(point))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn size(&self) -> usize {
        if self.children.is_empty() {
            1
        } else {
            self.children.iter().map(|child| child.size()).sum()
        }
    }
}
