//! Comment thread reconstruction from a flat parent-pointer list.
//!
//! Comments are stored flat, each optionally pointing at a parent comment.
//! [`assemble`] rebuilds the nested forest the client renders and
//! [`count_forest`] / [`count_flat`] give the total shown next to it. Both
//! gateways go through these functions so demo and hosted mode stay in
//! lockstep. [`write_json`] encodes a forest of any depth without recursing.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::ser::{Error as _, Serialize, Serializer};

/// The fields thread assembly needs from a comment.
pub trait Threaded {
    fn id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
    fn created_at(&self) -> DateTime<Utc>;
    fn is_pinned(&self) -> bool;
}

/// Deepest nesting the `Serialize` impl of [`Thread`] follows before it
/// errors. Use [`write_json`] for forests of any depth.
pub const SERIALIZE_DEPTH_LIMIT: usize = 128;

/// One node of the assembled forest.
///
/// Serializes as the item's own fields plus a `replies` array.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread<T> {
    pub item: T,
    pub replies: Vec<Thread<T>>,
}

impl<T> Drop for Thread<T> {
    fn drop(&mut self) {
        // Detach the subtree so dropping a long chain stays flat.
        let mut stack = std::mem::take(&mut self.replies);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.replies);
        }
    }
}

#[derive(serde::Serialize)]
struct Node<'a, T: Serialize> {
    #[serde(flatten)]
    item: &'a T,
    replies: Replies<'a, T>,
}

struct Replies<'a, T> {
    nodes: &'a [Thread<T>],
    depth: usize,
}

impl<'a, T: Serialize> Serialize for Replies<'a, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.depth > SERIALIZE_DEPTH_LIMIT && !self.nodes.is_empty() {
            return Err(S::Error::custom("comment thread nested too deeply"));
        }
        serializer.collect_seq(self.nodes.iter().map(|node| Node {
            item: &node.item,
            replies: Replies {
                nodes: &node.replies,
                depth: self.depth + 1,
            },
        }))
    }
}

impl<T: Serialize> Serialize for Thread<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Node {
            item: &self.item,
            replies: Replies {
                nodes: &self.replies,
                depth: 1,
            },
        }
        .serialize(serializer)
    }
}

enum Step<'a, T> {
    Open(&'a Thread<T>, bool),
    Close,
}

/// Writes `forest` as a JSON array, the same bytes `serde_json` produces
/// for it, without recursing. Each item must serialize as a JSON object.
pub fn write_json<T: Serialize>(
    forest: &[Thread<T>],
    out: &mut Vec<u8>,
) -> serde_json::Result<()> {
    let mut stack: Vec<Step<'_, T>> = Vec::with_capacity(forest.len());
    push_level(forest, &mut stack);

    out.push(b'[');
    while let Some(step) = stack.pop() {
        match step {
            Step::Open(node, first) => {
                if !first {
                    out.push(b',');
                }
                let mut head = serde_json::to_vec(&node.item)?;
                if head.first() != Some(&b'{') || head.pop() != Some(b'}') {
                    return Err(serde_json::Error::custom(
                        "thread item did not serialize as an object",
                    ));
                }
                out.extend_from_slice(&head);
                if head.len() > 1 {
                    out.push(b',');
                }
                out.extend_from_slice(b"\"replies\":[");
                stack.push(Step::Close);
                push_level(&node.replies, &mut stack);
            }
            Step::Close => out.extend_from_slice(b"]}"),
        }
    }
    out.push(b']');
    Ok(())
}

fn push_level<'a, T>(nodes: &'a [Thread<T>], stack: &mut Vec<Step<'a, T>>) {
    for (i, node) in nodes.iter().enumerate().rev() {
        stack.push(Step::Open(node, i == 0));
    }
}

/// Pinned first, then newest first.
fn root_order<T: Threaded>(a: &T, b: &T) -> Ordering {
    b.is_pinned()
        .cmp(&a.is_pinned())
        .then_with(|| b.created_at().cmp(&a.created_at()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Oldest first, so replies read as a conversation. Pin state is ignored.
fn reply_order<T: Threaded>(a: &T, b: &T) -> Ordering {
    a.created_at()
        .cmp(&b.created_at())
        .then_with(|| a.id().cmp(b.id()))
}

/// Builds the ordered forest from a flat collection that is already filtered
/// to one file and stripped of deleted comments.
///
/// A comment whose parent is missing from `items`, or is itself, becomes a
/// root. Parent cycles are broken by promoting one member to a root, so
/// every input item appears in the output exactly once.
pub fn assemble<T: Threaded>(items: Vec<T>) -> Vec<Thread<T>> {
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }

    let mut parent: Vec<Option<usize>> = {
        // The first occurrence of a duplicated id is the one replies attach to.
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(n);
        for (i, item) in items.iter().enumerate() {
            index.entry(item.id()).or_insert(i);
        }

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.parent_id()
                    .and_then(|p| index.get(p).copied())
                    .filter(|&p| p != i)
            })
            .collect()
    };

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (child, p) in parent.iter().enumerate() {
        if let Some(p) = *p {
            children[p].push(child);
        }
    }

    let mut roots: Vec<usize> = (0..n).filter(|&i| parent[i].is_none()).collect();
    let mut reached = vec![false; n];
    // Discovery order; a parent always precedes its children.
    let mut order: Vec<usize> = Vec::with_capacity(n);
    for &root in &roots {
        mark_reachable(root, &children, &mut reached, &mut order);
    }

    // Whatever is still unreached sits on, or hangs below, a parent cycle.
    for start in 0..n {
        if reached[start] {
            continue;
        }
        let mut seen = HashSet::new();
        let mut cur = start;
        while seen.insert(cur) {
            match parent[cur] {
                Some(p) => cur = p,
                None => break,
            }
        }
        if let Some(p) = parent[cur].take() {
            children[p].retain(|&c| c != cur);
        }
        tracing::warn!(comment_id = items[cur].id(), "Comment parent cycle broken");
        roots.push(cur);
        mark_reachable(cur, &children, &mut reached, &mut order);
    }

    roots.sort_by(|&a, &b| root_order(&items[a], &items[b]));
    for list in children.iter_mut() {
        list.sort_by(|&a, &b| reply_order(&items[a], &items[b]));
    }

    // Build bottom-up so deep chains never recurse.
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut built: Vec<Option<Thread<T>>> = (0..n).map(|_| None).collect();
    for &i in order.iter().rev() {
        let replies = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(item) = slots[i].take() {
            built[i] = Some(Thread { item, replies });
        }
    }

    roots.iter().filter_map(|&r| built[r].take()).collect()
}

fn mark_reachable(
    start: usize,
    children: &[Vec<usize>],
    reached: &mut [bool],
    order: &mut Vec<usize>,
) {
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if reached[i] {
            continue;
        }
        reached[i] = true;
        order.push(i);
        stack.extend(children[i].iter().copied());
    }
}

/// Total comments in an assembled forest, replies at every depth included.
pub fn count_forest<T>(forest: &[Thread<T>]) -> usize {
    let mut total = 0;
    let mut stack: Vec<&Thread<T>> = forest.iter().collect();
    while let Some(node) = stack.pop() {
        total += 1;
        stack.extend(node.replies.iter());
    }
    total
}

/// Total comments in the flat collection. Agrees with
/// `count_forest(&assemble(items))`.
pub fn count_flat<T>(items: &[T]) -> usize {
    items.len()
}

/// Ids of `root_id` and every comment below it, following `parent_id`
/// links. Empty when `root_id` is not among `items`.
pub fn descendants<T: Threaded>(items: &[T], root_id: &str) -> Vec<String> {
    if !items.iter().any(|item| item.id() == root_id) {
        return Vec::new();
    }

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for item in items {
        if let Some(p) = item.parent_id() {
            if p != item.id() {
                children.entry(p).or_default().push(item.id());
            }
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![root_id];
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        out.push(id.to_string());
        if let Some(kids) = children.get(id) {
            stack.extend(kids.iter().copied());
        }
    }
    out
}
