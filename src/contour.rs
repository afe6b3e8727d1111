//! Contour documents and the component/peak tree built from them.
//!
//! A document is a nested list of rings. When every outer element holds one
//! top-level contour with its inner rings, each tree is built from its own
//! element only. Otherwise the rings are pooled and regrouped by flux level.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ContourError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

/// One closed polygon at one flux level, exactly as found in the contour JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ring {
    pub bbox: [f64; 4],
    pub level: f64,
    pub arr: Vec<Vertex>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourDocument {
    pub contours: Vec<Vec<Ring>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContourDocument {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ContourError> {
        let document: ContourDocument = serde_json::from_slice(bytes)?;
        document.check()?;
        Ok(document)
    }

    fn check(&self) -> Result<(), ContourError> {
        for ring in self.contours.iter().flatten() {
            if !ring.level.is_finite() || ring.bbox.iter().any(|v| !v.is_finite()) {
                return Err(ContourError::Malformed(format!(
                    "non-finite level or bbox in ring at level {}",
                    ring.level
                )));
            }
            if ring.arr.iter().any(|v| !v.x.is_finite() || !v.y.is_finite()) {
                return Err(ContourError::Malformed("non-finite vertex".to_string()));
            }
        }
        Ok(())
    }

    /// Lowest flux threshold in the document, in Jy/beam.
    pub fn outermost_level(&self) -> Option<f64> {
        self.contours
            .iter()
            .flatten()
            .map(|r| r.level)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Rings regrouped into strictly ascending flux levels.
    pub fn levels(&self) -> Vec<Vec<&Ring>> {
        regroup_by_level(self.contours.iter().flatten())
    }

    /// True when each outer element starts with the only lowest-level ring it holds.
    fn grouped_per_contour(&self) -> bool {
        let Some(lowest) = self.outermost_level() else {
            return false;
        };
        self.contours.iter().all(|group| {
            group.first().is_some_and(|ring| ring.level == lowest)
                && group.iter().filter(|ring| ring.level == lowest).count() == 1
        })
    }

    /// Ring pools that trees are built from, each regrouped by level.
    fn component_pools(&self) -> Vec<Vec<Vec<&Ring>>> {
        if self.grouped_per_contour() {
            self.contours
                .iter()
                .map(|group| regroup_by_level(group.iter()))
                .collect()
        } else {
            vec![self.levels()]
        }
    }
}

fn regroup_by_level<'a>(rings: impl Iterator<Item = &'a Ring>) -> Vec<Vec<&'a Ring>> {
    let mut by_level: BTreeMap<u64, (f64, Vec<&Ring>)> = BTreeMap::new();
    for ring in rings {
        by_level
            .entry(ring.level.to_bits())
            .or_insert_with(|| (ring.level, Vec::new()))
            .1
            .push(ring);
    }
    let mut levels: Vec<(f64, Vec<&Ring>)> = by_level.into_values().collect();
    levels.sort_by(|a, b| a.0.total_cmp(&b.0));
    levels.into_iter().map(|(_, rings)| rings).collect()
}

/// Axis-aligned box in contour pixel space, normalised so min <= max.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl PixelBox {
    /// Contour bboxes are stored as two opposite corners in either order.
    pub fn from_bbox(bbox: &[f64; 4]) -> Self {
        Self {
            x_min: bbox[0].min(bbox[2]),
            y_min: bbox[1].min(bbox[3]),
            x_max: bbox[0].max(bbox[2]),
            y_max: bbox[1].max(bbox[3]),
        }
    }

    pub fn contains(&self, other: &PixelBox) -> bool {
        other.x_min >= self.x_min
            && other.x_max <= self.x_max
            && other.y_min >= self.y_min
            && other.y_max <= self.y_max
    }

    pub fn area(&self) -> f64 {
        (self.x_max - self.x_min) * (self.y_max - self.y_min)
    }
}

/// Component-wise approximate bbox equality.
pub fn bbox_approx_eq(a: &[f64; 4], b: &[f64; 4], tolerance: f64) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance)
}

/// One ring and the higher-level rings nested inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourNode {
    pub level: f64,
    pub bbox: [f64; 4],
    pub vertices: Vec<(f64, f64)>,
    pub children: Vec<ContourNode>,
}

impl ContourNode {
    fn from_ring(ring: &Ring) -> Self {
        Self {
            level: ring.level,
            bbox: ring.bbox,
            vertices: ring.arr.iter().map(|v| (v.x, v.y)).collect(),
            children: Vec::new(),
        }
    }

    pub fn pixel_box(&self) -> PixelBox {
        PixelBox::from_bbox(&self.bbox)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Shoelace area of the ring in square pixels.
    pub fn polygon_area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let twice_area: f64 = (0..n)
            .map(|i| {
                let (x1, y1) = self.vertices[i];
                let (x2, y2) = self.vertices[(i + 1) % n];
                x1 * y2 - x2 * y1
            })
            .sum();
        twice_area.abs() / 2.0
    }

    /// Mean vertex position, the fallback reference point for degenerate rings.
    pub fn vertex_centroid(&self) -> Option<(f64, f64)> {
        if self.vertices.is_empty() {
            return None;
        }
        let n = self.vertices.len() as f64;
        let (sx, sy) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
        Some((sx / n, sy / n))
    }

    /// Check the nesting invariants for the whole subtree.
    pub fn validate(&self) -> Result<(), ContourError> {
        let outer = self.pixel_box();
        for child in &self.children {
            if child.level <= self.level {
                return Err(ContourError::InvariantViolation(format!(
                    "child level {} does not exceed parent level {}",
                    child.level, self.level
                )));
            }
            if !outer.contains(&child.pixel_box()) {
                return Err(ContourError::InvariantViolation(format!(
                    "child bbox {:?} not enclosed by parent bbox {:?}",
                    child.bbox, self.bbox
                )));
            }
            child.validate()?;
        }
        Ok(())
    }

    /// Leaves that are genuine local maxima, in post-order.
    ///
    /// A leaf enclosed by a sibling ring at the same level is a contour artifact
    /// (typically the inner edge of a hole) and is skipped.
    pub fn peak_leaves(&self) -> Vec<&ContourNode> {
        let mut leaves = Vec::new();
        if self.is_leaf() {
            leaves.push(self);
        } else {
            self.collect_peak_leaves(&mut leaves);
        }
        leaves
    }

    fn collect_peak_leaves<'a>(&'a self, leaves: &mut Vec<&'a ContourNode>) {
        for (i, child) in self.children.iter().enumerate() {
            if child.is_leaf() {
                let shadowed = self.children.iter().enumerate().any(|(j, sibling)| {
                    i != j
                        && sibling.level == child.level
                        && sibling.pixel_box().area() > child.pixel_box().area()
                        && sibling.pixel_box().contains(&child.pixel_box())
                });
                if !shadowed {
                    leaves.push(child);
                }
            } else {
                child.collect_peak_leaves(leaves);
            }
        }
    }

    /// True when the ring was clipped by the image boundary: its first and last
    /// vertices do not meet and some vertex sits within `margin` of an edge.
    pub fn is_overedge(&self, width: usize, height: usize, margin: f64, max_gap: f64) -> bool {
        let (first, last) = match (self.vertices.first(), self.vertices.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return false,
        };
        let gap = ((first.0 - last.0).powi(2) + (first.1 - last.1).powi(2)).sqrt();
        if gap <= max_gap {
            return false;
        }
        let x_edge = width as f64 - margin;
        let y_edge = height as f64 - margin;
        self.vertices
            .iter()
            .any(|&(x, y)| x <= margin || y <= margin || x >= x_edge || y >= y_edge)
    }
}

/// Build one tree per lowest-level ring whose bbox matches a consensus bbox.
///
/// Within a ring pool, every ring at each following level is attached to the
/// smallest enclosing ring of the level below across all top-level rings of
/// that pool, so a ring never hangs off two trees. An empty result means the
/// consensus grouping points at geometry absent from the document.
pub fn build_trees(
    document: &ContourDocument,
    consensus_bboxes: &[[f64; 4]],
    tolerance: f64,
) -> Result<Vec<ContourNode>, ContourError> {
    let mut trees = Vec::new();
    for levels in document.component_pools() {
        let Some(top_level) = levels.first() else {
            continue;
        };
        let mut roots: Vec<ContourNode> =
            top_level.iter().map(|ring| ContourNode::from_ring(ring)).collect();
        attach_levels(&mut roots, &levels[1..]);

        for root in roots {
            let matched = consensus_bboxes
                .iter()
                .any(|bbox| bbox_approx_eq(&root.bbox, bbox, tolerance));
            if matched {
                root.validate()?;
                trees.push(root);
            }
        }
    }
    Ok(trees)
}

fn attach_levels(roots: &mut [ContourNode], deeper: &[Vec<&Ring>]) {
    let mut frontier: Vec<&mut ContourNode> = roots.iter_mut().collect();
    for rings in deeper {
        for ring in rings {
            let child_box = PixelBox::from_bbox(&ring.bbox);
            let parent = frontier
                .iter()
                .enumerate()
                .filter(|(_, node)| node.pixel_box().contains(&child_box))
                .min_by(|(_, a), (_, b)| a.pixel_box().area().total_cmp(&b.pixel_box().area()))
                .map(|(i, _)| i);
            match parent {
                Some(i) => frontier[i].children.push(ContourNode::from_ring(ring)),
                None => tracing::trace!("ring at level {} outside every component", ring.level),
            }
        }
        frontier = frontier
            .into_iter()
            .flat_map(|node| node.children.iter_mut())
            .collect();
        if frontier.is_empty() {
            break;
        }
    }
}
