//! FILENAME: grouping-engine/src/hierarchy.rs
//! Hierarchy Builder - partitions records into a multi-level group tree.
//!
//! Algorithm:
//! 1. Start from a synthetic root owning every record index
//! 2. For each resolved level, split every current leaf by the level's key
//! 3. Keep keys in first-seen order unless the level asks for sorting
//! 4. Recurse until all levels are consumed
//!
//! Member indices stay sorted ascending at every node, which lets the pivot
//! builder intersect two trees with a linear merge.

use std::cmp::Ordering;

use chrono::Datelike;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use tabular::{Record, RecordIndex, Value};

use crate::definition::{
    EngineOptions, GroupFunction, GroupParams, GroupingLevel, Level, SortOrder, TimeUnit,
};
use crate::error::Diagnostic;
use crate::registry::FunctionRegistry;

// ============================================================================
// TREE STRUCTURES
// ============================================================================

/// A node of the group tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupNode {
    /// Composite key for this node's level. Empty for the root.
    pub key: String,

    /// Display label (template-rendered when the level has a template).
    pub label: String,

    /// Keys from the outermost level down to this node, inclusive.
    pub path: Vec<String>,

    /// Declared level number that produced this node (0 for the root).
    pub level: Level,

    /// Pass index (0 for the root, 1 for the first pass, ...).
    pub depth: usize,

    pub children: Vec<GroupNode>,

    /// Sorted indices of every record in this node's subtree.
    pub member_records: Vec<RecordIndex>,
}

impl GroupNode {
    fn root(member_records: Vec<RecordIndex>) -> Self {
        GroupNode {
            key: String::new(),
            label: String::new(),
            path: Vec::new(),
            level: 0,
            depth: 0,
            children: Vec::new(),
            member_records,
        }
    }

    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.member_records.len()
    }

    /// Visits this node and all descendants in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a GroupNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Number of leaves beneath this node (1 for a leaf).
    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children.iter().map(GroupNode::leaf_count).sum()
        }
    }
}

/// The result of the hierarchy builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTree {
    pub root: GroupNode,

    /// The resolved levels this tree was built from, outermost first.
    pub levels: Vec<GroupingLevel>,

    /// Size of the record store the tree indexes into.
    pub record_count: usize,
}

/// A depth-first flattened node, for header rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderItem {
    pub path: Vec<String>,
    pub key: String,
    pub label: String,
    pub level: Level,
    pub depth: usize,
    pub is_leaf: bool,
    /// Number of leaves this header spans.
    pub leaf_span: usize,
    pub record_count: usize,
}

impl GroupTree {
    /// Leaves in depth-first build order. A tree without levels has the
    /// root as its single leaf.
    pub fn leaves(&self) -> Vec<&GroupNode> {
        let mut leaves = Vec::new();
        self.root.walk(&mut |node| {
            if node.is_leaf() {
                leaves.push(node);
            }
        });
        leaves
    }

    /// Finds the node at a key path. The empty path is the root.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<&GroupNode> {
        let mut node = &self.root;
        for key in path {
            node = node.children.iter().find(|c| c.key == key.as_ref())?;
        }
        Some(node)
    }

    /// All nodes produced by the given declared level, in build order.
    pub fn nodes_at_level(&self, level: Level) -> Vec<&GroupNode> {
        let mut nodes = Vec::new();
        self.root.walk(&mut |node| {
            if node.level == level {
                nodes.push(node);
            }
        });
        nodes
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.root.walk(&mut |_| count += 1);
        count
    }

    /// Depth-first header list, excluding the synthetic root.
    pub fn flatten(&self) -> Vec<HeaderItem> {
        let mut items = Vec::new();
        self.root.walk(&mut |node| {
            if node.is_root() {
                return;
            }
            items.push(HeaderItem {
                path: node.path.clone(),
                key: node.key.clone(),
                label: node.label.clone(),
                level: node.level,
                depth: node.depth,
                is_leaf: node.is_leaf(),
                leaf_span: node.leaf_count(),
                record_count: node.record_count(),
            });
        });
        items
    }

    /// Record indices of the node at `path`.
    pub fn drill_down<S: AsRef<str>>(&self, path: &[S]) -> Option<&[RecordIndex]> {
        self.find(path).map(|node| node.member_records.as_slice())
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// One child-to-be while partitioning a node.
struct Bucket {
    key: String,
    label: String,
    members: Vec<RecordIndex>,
}

/// Builds group trees for one record store.
pub struct HierarchyBuilder<'a> {
    records: &'a [Record],
    options: &'a EngineOptions,
    registry: &'a FunctionRegistry,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(records: &'a [Record], options: &'a EngineOptions, registry: &'a FunctionRegistry) -> Self {
        HierarchyBuilder {
            records,
            options,
            registry,
            diagnostics: Vec::new(),
        }
    }

    /// Builds the tree for already-resolved levels.
    pub fn build(&mut self, levels: &[GroupingLevel]) -> GroupTree {
        let mut root = GroupNode::root((0..self.records.len()).collect());
        self.build_level(&mut root, levels, 0);

        let tree = GroupTree {
            root,
            levels: levels.to_vec(),
            record_count: self.records.len(),
        };
        log::debug!(
            "built group tree: {} records, {} levels, {} nodes",
            tree.record_count,
            levels.len(),
            tree.node_count()
        );
        tree
    }

    /// Diagnostics collected so far.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Recursively builds the children of `node` for `levels[pass]`.
    fn build_level(&mut self, node: &mut GroupNode, levels: &[GroupingLevel], pass: usize) {
        let level = match levels.get(pass) {
            Some(l) => l,
            None => return,
        };

        let mut buckets = match &level.function {
            GroupFunction::Custom { id, params } => self.partition_custom(level, id, params, &node.member_records),
            _ => self.partition_by_key(level, &node.member_records),
        };
        sort_buckets(&mut buckets, level.sort);

        node.children = buckets
            .into_iter()
            .map(|bucket| {
                let mut path = node.path.clone();
                path.push(bucket.key.clone());
                let mut child = GroupNode {
                    key: bucket.key,
                    label: bucket.label,
                    path,
                    level: level.level,
                    depth: pass + 1,
                    children: Vec::new(),
                    member_records: bucket.members,
                };
                self.build_level(&mut child, levels, pass + 1);
                child
            })
            .collect();
    }

    /// Partitions members by a per-record key, preserving first-seen order.
    fn partition_by_key(&self, level: &GroupingLevel, members: &[RecordIndex]) -> Vec<Bucket> {
        let mut buckets: Vec<Bucket> = Vec::new();
        let mut positions: FxHashMap<String, usize> = FxHashMap::default();

        for &idx in members {
            let (key, label) = self.record_key(level, &self.records[idx]);
            match positions.get(&key) {
                Some(&pos) => buckets[pos].members.push(idx),
                None => {
                    positions.insert(key.clone(), buckets.len());
                    buckets.push(Bucket {
                        key,
                        label,
                        members: vec![idx],
                    });
                }
            }
        }

        buckets
    }

    /// Computes the composite key and display label of one record.
    fn record_key(&self, level: &GroupingLevel, record: &Record) -> (String, String) {
        let components: SmallVec<[Option<String>; 4]> = level
            .fields
            .iter()
            .map(|field| self.component(&level.function, record.value(field)))
            .collect();

        let sentinel = &self.options.missing_sentinel;
        let all_missing = components.iter().all(Option::is_none);

        let joined = if all_missing {
            sentinel.clone()
        } else {
            components
                .iter()
                .map(|c| c.as_deref().unwrap_or(sentinel))
                .collect::<Vec<&str>>()
                .join(&level.separator)
        };

        let rendered = level.template.as_ref().map(|template| {
            render_template(template, |name| {
                let pos = level.fields.iter().position(|f| f == name)?;
                Some(components[pos].as_deref().unwrap_or(sentinel))
            })
        });

        match (&level.function, rendered) {
            (GroupFunction::MultiFieldComposite, Some(rendered)) => (rendered.clone(), rendered),
            (_, Some(rendered)) => (joined, rendered),
            (_, None) => (joined.clone(), joined),
        }
    }

    /// One field's contribution to a key. `None` means the value is missing.
    fn component(&self, function: &GroupFunction, value: &Value) -> Option<String> {
        match function {
            GroupFunction::ByField | GroupFunction::MultiFieldComposite | GroupFunction::Custom { .. } => {
                value.display_string()
            }
            GroupFunction::NumericRange { min, step } => Some(
                numeric_range_key(value, *min, *step).unwrap_or_else(|| self.options.other_label.clone()),
            ),
            GroupFunction::TimePeriod { unit } => Some(
                time_period_key(value, *unit).unwrap_or_else(|| self.options.unparsed_label.clone()),
            ),
        }
    }

    /// Delegates to a registered function and maps its subsets back to
    /// record indices.
    ///
    /// Positions out of range are ignored, a record claimed twice stays in
    /// its first bucket, and unclaimed records are collected under the
    /// missing-value sentinel so the partition stays complete.
    fn partition_custom(
        &mut self,
        level: &GroupingLevel,
        id: &str,
        params: &GroupParams,
        members: &[RecordIndex],
    ) -> Vec<Bucket> {
        let sentinel = self.options.missing_sentinel.clone();
        let function = match self.registry.group_function(id) {
            Some(f) => f,
            None => {
                log::warn!("group function '{}' disappeared from the registry; using one bucket", id);
                return vec![Bucket {
                    key: sentinel.clone(),
                    label: sentinel,
                    members: members.to_vec(),
                }];
            }
        };

        let subset: Vec<&Record> = members.iter().map(|&idx| &self.records[idx]).collect();
        let assignments = function(&subset, params);

        let mut claimed = vec![false; members.len()];
        let mut buckets: Vec<Bucket> = Vec::new();
        let mut positions: FxHashMap<String, usize> = FxHashMap::default();

        for (key, local_positions) in assignments {
            let pos = *positions.entry(key.clone()).or_insert_with(|| {
                buckets.push(Bucket {
                    label: key.clone(),
                    key,
                    members: Vec::new(),
                });
                buckets.len() - 1
            });
            for local in local_positions {
                if local < members.len() && !claimed[local] {
                    claimed[local] = true;
                    buckets[pos].members.push(members[local]);
                }
            }
        }

        let unassigned: Vec<RecordIndex> = claimed
            .iter()
            .zip(members)
            .filter(|(taken, _)| !**taken)
            .map(|(_, &idx)| idx)
            .collect();
        if !unassigned.is_empty() {
            log::debug!(
                "group function '{}' left {} records unassigned on level {}",
                id,
                unassigned.len(),
                level.level
            );
            self.diagnostics.push(Diagnostic::UnassignedRecords {
                level: level.level,
                id: id.to_string(),
                count: unassigned.len(),
            });
            match buckets.iter_mut().find(|b| b.key == sentinel) {
                Some(bucket) => bucket.members.extend(unassigned),
                None => buckets.push(Bucket {
                    key: sentinel.clone(),
                    label: sentinel,
                    members: unassigned,
                }),
            }
        }

        buckets.retain(|b| !b.members.is_empty());
        for bucket in &mut buckets {
            bucket.members.sort_unstable();
        }
        if let Some(template) = &level.template {
            for bucket in &mut buckets {
                let key = bucket.key.clone();
                bucket.label = render_template(template, |_| Some(key.as_str()));
            }
        }
        buckets
    }
}

/// Builds a tree with a fresh builder, returning its diagnostics alongside.
pub fn build_tree(
    records: &[Record],
    levels: &[GroupingLevel],
    options: &EngineOptions,
    registry: &FunctionRegistry,
) -> (GroupTree, Vec<Diagnostic>) {
    let mut builder = HierarchyBuilder::new(records, options, registry);
    let tree = builder.build(levels);
    (tree, builder.into_diagnostics())
}

// ============================================================================
// KEY FUNCTIONS
// ============================================================================

/// `"{start}-{start+step}"` for values at or above `min`; `None` otherwise.
pub fn numeric_range_key(value: &Value, min: f64, step: f64) -> Option<String> {
    let n = value.as_number()?;
    if n < min || step <= 0.0 {
        return None;
    }
    let start = ((n - min) / step).floor() * step + min;
    Some(format!("{}-{}", tidy(start), tidy(start + step)))
}

/// Removes binary noise such as `0.30000000000000004`.
fn tidy(x: f64) -> f64 {
    let rounded = (x * 1e10).round() / 1e10;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Truncates a date value to a calendar period; `None` if it is not a date.
pub fn time_period_key(value: &Value, unit: TimeUnit) -> Option<String> {
    let date = value.as_date()?;
    Some(match unit {
        TimeUnit::Year => format!("{}", date.year()),
        TimeUnit::Quarter => format!("{}-Q{}", date.year(), (date.month() + 2) / 3),
        TimeUnit::Month => format!("{}-{:02}", date.year(), date.month()),
        TimeUnit::Week => {
            let week = date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
    })
}

/// Substitutes `{name}` placeholders. Unknown placeholders are kept verbatim.
fn render_template<'v>(template: &str, lookup: impl Fn(&str) -> Option<&'v str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match lookup(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn sort_buckets(buckets: &mut [Bucket], order: SortOrder) {
    match order {
        SortOrder::DataSourceOrder => {}
        SortOrder::Ascending => buckets.sort_by(|a, b| compare_keys(&a.key, &b.key)),
        SortOrder::Descending => buckets.sort_by(|a, b| compare_keys(&b.key, &a.key)),
    }
}

/// Total order on keys: keys with a leading number come first, ordered by
/// that number, then by the full text; all other keys follow as text.
/// "2-4" sorts before "10-12" and "5.5.5" before "9".
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (leading_number(a), leading_number(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// The longest `-?digits[.digits]` prefix, if it holds at least one digit.
fn leading_number(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = usize::from(bytes.first() == Some(&b'-'));
    let mut digits = 0;
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        if b.is_ascii_digit() {
            digits += 1;
        } else if b == b'.' && !seen_dot {
            seen_dot = true;
        } else {
            break;
        }
        end += 1;
    }
    if digits == 0 {
        return None;
    }
    s[..end].parse().ok()
}
