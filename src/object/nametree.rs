//! Name trees: string-keyed search trees stored across indirect objects.

use crate::error::*;
use crate::object::{Object, Ref, Resolve};
use crate::primitive::{PdfString, Primitive};
use log::warn;

#[derive(Debug)]
pub enum NameTreeNode<T> {
    Intermediate(Vec<Ref<NameTree<T>>>),
    Leaf(Vec<(PdfString, T)>),
}

/// A node of a name tree. The root is the only node allowed to omit
/// `/Limits`.
#[derive(Debug)]
pub struct NameTree<T> {
    pub limits: Option<(PdfString, PdfString)>,
    pub node: NameTreeNode<T>,
}

impl<T: Object> Object for NameTree<T> {
    fn from_primitive(p: Primitive, resolve: &impl Resolve) -> Result<Self> {
        let mut dict = t!(p.resolve(resolve)?.into_dictionary());

        let limits = match dict.remove("Limits") {
            Some(limits) => {
                let limits = limits.resolve(resolve)?.into_array()?;
                if limits.len() != 2 {
                    bail!("name tree /Limits is not of length 2");
                }
                let low = limits[0].clone().resolve(resolve)?.into_string()?;
                let high = limits[1].clone().resolve(resolve)?.into_string()?;
                Some((low, high))
            }
            None => None,
        };

        let kids = dict.remove("Kids");
        let names = dict.remove("Names");
        Ok(match (kids, names) {
            (Some(kids), _) => {
                let kids = t!(kids
                    .resolve(resolve)?
                    .into_array()?
                    .iter()
                    .map(|kid| Ref::<NameTree<T>>::from_primitive(kid.clone(), resolve))
                    .collect::<Result<Vec<_>>>());
                NameTree {
                    limits,
                    node: NameTreeNode::Intermediate(kids),
                }
            }
            (None, Some(names)) => {
                let names = names.resolve(resolve)?.into_array()?;
                let mut pairs = Vec::with_capacity(names.len() / 2);
                for pair in names.chunks_exact(2) {
                    let key = pair[0].clone().resolve(resolve)?.into_string()?;
                    let value = t!(T::from_primitive(pair[1].clone(), resolve));
                    pairs.push((key, value));
                }
                NameTree {
                    limits,
                    node: NameTreeNode::Leaf(pairs),
                }
            }
            (None, None) => {
                warn!("neither Kids nor Names present in name tree node");
                NameTree {
                    limits,
                    node: NameTreeNode::Intermediate(vec![]),
                }
            }
        })
    }
}

impl<T: Object + Clone> NameTree<T> {
    /// Find the value stored under `key`. Keys are byte strings and compare
    /// bytewise; intermediate nodes are pruned with their `/Limits` and the
    /// leaf is binary-searched.
    pub fn lookup(&self, r: &impl Resolve, key: &[u8]) -> Result<T> {
        let not_found = || PdfError::NotFound {
            word: String::from_utf8_lossy(key).into(),
        };
        match self.node {
            NameTreeNode::Leaf(ref items) => items
                .binary_search_by(|(k, _)| k.as_bytes().cmp(key))
                .map(|i| items[i].1.clone())
                .map_err(|_| not_found()),
            NameTreeNode::Intermediate(ref kids) => {
                for &kid_ref in kids {
                    let kid = r.get(kid_ref)?;
                    let (low, high) = match kid.limits {
                        Some((ref low, ref high)) => (low, high),
                        None => {
                            warn!("name tree node without limits");
                            continue;
                        }
                    };
                    if key < low.as_bytes() {
                        // children are sorted: no later sibling can hold it
                        return Err(not_found());
                    }
                    if key <= high.as_bytes() {
                        return kid.lookup(r, key);
                    }
                }
                Err(not_found())
            }
        }
    }
}

impl<T: Object> NameTree<T> {
    /// In-order traversal of every `(key, value)` pair.
    pub fn walk(&self, r: &impl Resolve, callback: &mut dyn FnMut(&PdfString, &T)) -> Result<()> {
        match self.node {
            NameTreeNode::Leaf(ref items) => {
                for (name, value) in items {
                    callback(name, value);
                }
            }
            NameTreeNode::Intermediate(ref items) => {
                for &tree_ref in items {
                    let tree = r.get(tree_ref)?;
                    tree.walk(r, callback)?;
                }
            }
        }
        Ok(())
    }
}
