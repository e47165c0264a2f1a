//! Snapshot & spatial query engine.
//!
//! A [`Snapshot`] is the ordered, immutable set of [`BoundingBox`]es produced
//! by one detector pass over one frame.  Every query returns a new snapshot
//! that shares the underlying boxes, so subsets are cheap and can be chained:
//!
//! ```rust
//! use stagehand_perception::snapshot::{GroupMode, Snapshot};
//! use stagehand_types::{Detection, Frame, Rect};
//!
//! let frame = Frame::filled(400, 200, [0, 0, 0]);
//! let det = |label: &str, x1, y1, x2, y2| Detection {
//!     label: label.to_string(),
//!     rect: Rect::new(x1, y1, x2, y2),
//!     confidence: 0.9,
//! };
//! let snapshot = Snapshot::from_detections(&frame, &[
//!     det("button", 40, 150, 140, 180),
//!     det("modal_header", 20, 20, 380, 60),
//!     det("button", 260, 150, 360, 180),
//! ]);
//!
//! let buttons = snapshot.filter_by_label("button");
//! let rows = buttons.group_by_position(Some(30), None, GroupMode::Center, 10);
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].get_x_max_element().first().unwrap().rect.x1, 260);
//! ```
//!
//! Filters never fail; they return empty snapshots.  Only
//! [`Snapshot::first`] and [`Snapshot::get_col`] on an empty snapshot are
//! errors ([`StageError::EmptySet`]).

use std::sync::Arc;

use stagehand_types::{Detection, Frame, Rect, StageError};

/// A labelled rectangle plus the pixels it covers.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub rect: Rect,
    pub label: String,
    pub confidence: f32,
    /// Pixel region of the source frame under `rect`.
    pub crop: Arc<Frame>,
}

impl BoundingBox {
    pub fn center(&self) -> (i32, i32) {
        self.rect.center()
    }
}

/// How [`Snapshot::group_by_position`] measures the gap between neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// Distance between box centres.
    Center,
    /// Distance from the previous box's far edge to the next box's near edge.
    Edge,
}

/// Label requirement for [`Snapshot::find_containing_groups`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Every requested label must be enclosed.
    All,
    /// At least one requested box must be enclosed.
    Any,
}

/// Ordered, immutable collection of boxes from a single frame.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    boxes: Vec<Arc<BoundingBox>>,
}

impl Snapshot {
    /// Build a snapshot from raw detections, cropping each box out of `frame`.
    pub fn from_detections(frame: &Frame, detections: &[Detection]) -> Self {
        let boxes = detections
            .iter()
            .map(|d| {
                Arc::new(BoundingBox {
                    rect: d.rect,
                    label: d.label.clone(),
                    confidence: d.confidence,
                    crop: Arc::new(frame.crop(&d.rect)),
                })
            })
            .collect();
        Self { boxes }
    }

    pub fn from_boxes(boxes: Vec<Arc<BoundingBox>>) -> Self {
        Self { boxes }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BoundingBox>> {
        self.boxes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<BoundingBox>> {
        self.boxes.get(index)
    }

    /// The first box in insertion order.
    ///
    /// # Errors
    ///
    /// [`StageError::EmptySet`] when the snapshot is empty.
    pub fn first(&self) -> Result<&Arc<BoundingBox>, StageError> {
        self.boxes
            .first()
            .ok_or_else(|| StageError::EmptySet("first element of an empty snapshot".to_string()))
    }

    /// Labels in insertion order.
    pub fn labels(&self) -> Vec<&str> {
        self.boxes.iter().map(|b| b.label.as_str()).collect()
    }

    fn subset(&self, keep: impl Fn(&BoundingBox) -> bool) -> Snapshot {
        Snapshot {
            boxes: self.boxes.iter().filter(|b| keep(b)).cloned().collect(),
        }
    }

    // ── Label filters ────────────────────────────────────────────────────────

    pub fn filter_by_label(&self, label: &str) -> Snapshot {
        self.subset(|b| b.label == label)
    }

    pub fn filter_by_labels(&self, labels: &[&str]) -> Snapshot {
        self.subset(|b| labels.contains(&b.label.as_str()))
    }

    pub fn exists_label(&self, label: &str) -> bool {
        self.boxes.iter().any(|b| b.label == label)
    }

    pub fn exists_all_labels(&self, labels: &[&str]) -> bool {
        labels.iter().all(|l| self.exists_label(l))
    }

    // ── Extremal elements ────────────────────────────────────────────────────

    /// Single-element subset holding the box with the extreme `key`; ties go
    /// to the earliest box.
    fn extreme(&self, key: impl Fn(&BoundingBox) -> i32, largest: bool) -> Snapshot {
        let mut best: Option<&Arc<BoundingBox>> = None;
        for b in &self.boxes {
            let better = match best {
                None => true,
                Some(cur) if largest => key(b) > key(cur),
                Some(cur) => key(b) < key(cur),
            };
            if better {
                best = Some(b);
            }
        }
        Snapshot {
            boxes: best.into_iter().cloned().collect(),
        }
    }

    /// The top-most box (smallest top edge).
    pub fn get_y_min_element(&self) -> Snapshot {
        self.extreme(|b| b.rect.y1, false)
    }

    /// The bottom-most box (largest bottom edge).
    pub fn get_y_max_element(&self) -> Snapshot {
        self.extreme(|b| b.rect.y2, true)
    }

    /// The left-most box (smallest left edge).
    pub fn get_x_min_element(&self) -> Snapshot {
        self.extreme(|b| b.rect.x1, false)
    }

    /// The right-most box (largest right edge).
    pub fn get_x_max_element(&self) -> Snapshot {
        self.extreme(|b| b.rect.x2, true)
    }

    // ── Geometry ─────────────────────────────────────────────────────────────

    /// Rectangle enclosing every box, `None` when empty.
    pub fn bounds(&self) -> Option<Rect> {
        self.boxes
            .iter()
            .map(|b| b.rect)
            .reduce(|acc, r| acc.union(&r))
    }

    /// Centre of the rectangle enclosing the whole subset.
    ///
    /// # Errors
    ///
    /// [`StageError::EmptySet`] when the snapshot is empty.
    pub fn get_col(&self) -> Result<(i32, i32), StageError> {
        self.bounds()
            .map(|r| r.center())
            .ok_or_else(|| StageError::EmptySet("centre of an empty snapshot".to_string()))
    }

    /// Boxes whose centre x lies within `range` of `x`.
    pub fn get_center_x_range_elements(&self, x: i32, range: i32) -> Snapshot {
        self.subset(|b| (b.center().0 - x).abs() <= range)
    }

    /// Boxes whose centre y lies within `range` of `y`.
    pub fn get_y_range_elements(&self, y: i32, range: i32) -> Snapshot {
        self.subset(|b| (b.center().1 - y).abs() <= range)
    }

    /// Boxes of `other` vertically aligned with this subset: their centre x
    /// is within `x_tolerance` of this subset's centre x.
    ///
    /// # Errors
    ///
    /// [`StageError::EmptySet`] when `self` is empty.
    pub fn get_vertical_range_elements(
        &self,
        other: &Snapshot,
        x_tolerance: i32,
    ) -> Result<Snapshot, StageError> {
        let (cx, _) = self.get_col()?;
        Ok(other.subset(|b| (b.center().0 - cx).abs() <= x_tolerance))
    }

    /// Pairs `(mine, theirs)` sitting on the same row: top edges differ by at
    /// most `min(h1, h2) * tolerance_ratio`.
    pub fn match_rows_with(
        &self,
        other: &Snapshot,
        tolerance_ratio: f32,
    ) -> Vec<(Arc<BoundingBox>, Arc<BoundingBox>)> {
        let mut pairs = Vec::new();
        for a in &self.boxes {
            for b in &other.boxes {
                let tolerance = a.rect.height().min(b.rect.height()) as f32 * tolerance_ratio;
                if ((a.rect.y1 - b.rect.y1).abs() as f32) <= tolerance {
                    pairs.push((Arc::clone(a), Arc::clone(b)));
                }
            }
        }
        pairs
    }

    // ── Grouping ─────────────────────────────────────────────────────────────

    /// Cluster boxes into rows along y, then each row into columns along x.
    ///
    /// A `None` threshold keeps the whole input as one row (or one column).
    /// Each axis is a single greedy pass over the boxes stably sorted by that
    /// axis: a box joins the current cluster when its gap to the last box
    /// added is within `[-margin, threshold]`, otherwise it starts a new one.
    pub fn group_by_position(
        &self,
        row_threshold: Option<i32>,
        col_threshold: Option<i32>,
        mode: GroupMode,
        margin: i32,
    ) -> Vec<Snapshot> {
        if self.boxes.is_empty() {
            return Vec::new();
        }

        let rows = match row_threshold {
            Some(threshold) => greedy_clusters(
                self.boxes.clone(),
                threshold,
                margin,
                |b| match mode {
                    GroupMode::Center => b.center().1,
                    GroupMode::Edge => b.rect.y1,
                },
                |last, curr| match mode {
                    GroupMode::Center => curr.center().1 - last.center().1,
                    GroupMode::Edge => curr.rect.y1 - last.rect.y2,
                },
            ),
            None => vec![self.boxes.clone()],
        };

        let mut groups = Vec::new();
        for row in rows {
            match col_threshold {
                Some(threshold) => {
                    let cols = greedy_clusters(
                        row,
                        threshold,
                        margin,
                        |b| match mode {
                            GroupMode::Center => b.center().0,
                            GroupMode::Edge => b.rect.x1,
                        },
                        |last, curr| match mode {
                            GroupMode::Center => curr.center().0 - last.center().0,
                            GroupMode::Edge => curr.rect.x1 - last.rect.x2,
                        },
                    );
                    groups.extend(cols.into_iter().map(Snapshot::from_boxes));
                }
                None => groups.push(Snapshot::from_boxes(row)),
            }
        }
        groups
    }

    /// For every `container_label` box, the boxes it fully encloses whose
    /// label is in `include_labels`.  Each group is `[container, enclosed...]`.
    pub fn find_containing_groups(
        &self,
        container_label: &str,
        include_labels: &[&str],
        relation: Relation,
    ) -> Vec<Snapshot> {
        let mut groups = Vec::new();
        for container in self.boxes.iter().filter(|b| b.label == container_label) {
            let enclosed: Vec<Arc<BoundingBox>> = self
                .boxes
                .iter()
                .filter(|other| {
                    !Arc::ptr_eq(container, other)
                        && include_labels.contains(&other.label.as_str())
                        && container.rect.contains(&other.rect)
                })
                .cloned()
                .collect();

            let keep = match relation {
                Relation::All => include_labels
                    .iter()
                    .all(|l| enclosed.iter().any(|b| b.label == *l)),
                Relation::Any => !enclosed.is_empty(),
            };
            if keep {
                let mut members = Vec::with_capacity(enclosed.len() + 1);
                members.push(Arc::clone(container));
                members.extend(enclosed);
                groups.push(Snapshot::from_boxes(members));
            }
        }
        groups
    }
}

fn greedy_clusters(
    mut boxes: Vec<Arc<BoundingBox>>,
    threshold: i32,
    margin: i32,
    key: impl Fn(&BoundingBox) -> i32,
    gap: impl Fn(&BoundingBox, &BoundingBox) -> i32,
) -> Vec<Vec<Arc<BoundingBox>>> {
    boxes.sort_by_key(|b| key(b));
    let mut clusters = Vec::new();
    let mut current: Vec<Arc<BoundingBox>> = Vec::new();
    for b in boxes {
        let extends = current
            .last()
            .is_none_or(|last| (-margin..=threshold).contains(&gap(last, &b)));
        if !extends {
            clusters.push(std::mem::take(&mut current));
        }
        current.push(b);
    }
    if !current.is_empty() {
        clusters.push(current);
    }
    clusters
}
