//! Number trees: like name trees, keyed by integers (`/Nums`).

use crate::error::*;
use crate::object::{Object, Ref, Resolve};
use crate::primitive::Primitive;
use log::warn;

#[derive(Debug)]
pub enum NumberTreeNode<T> {
    Intermediate(Vec<Ref<NumberTree<T>>>),
    Leaf(Vec<(i32, T)>),
}

#[derive(Debug)]
pub struct NumberTree<T> {
    pub limits: Option<(i32, i32)>,
    pub node: NumberTreeNode<T>,
}

impl<T: Object> Object for NumberTree<T> {
    fn from_primitive(p: Primitive, resolve: &impl Resolve) -> Result<Self> {
        let mut dict = t!(p.resolve(resolve)?.into_dictionary());

        let limits = match dict.remove("Limits") {
            Some(limits) => {
                let limits = t!(limits.resolve(resolve)?.into_array());
                if limits.len() != 2 {
                    bail!("number tree /Limits is not of length 2");
                }
                let low = t!(i32::from_primitive(limits[0].clone(), resolve));
                let high = t!(i32::from_primitive(limits[1].clone(), resolve));
                Some((low, high))
            }
            None => None,
        };

        let kids = dict.remove("Kids");
        let nums = dict.remove("Nums");
        Ok(match (kids, nums) {
            (Some(kids), _) => {
                let kids = t!(kids
                    .resolve(resolve)?
                    .into_array()?
                    .iter()
                    .map(|kid| Ref::<NumberTree<T>>::from_primitive(kid.clone(), resolve))
                    .collect::<Result<Vec<_>>>());
                NumberTree {
                    limits,
                    node: NumberTreeNode::Intermediate(kids),
                }
            }
            (None, Some(nums)) => {
                let nums = nums.resolve(resolve)?.into_array()?;
                let mut pairs = Vec::with_capacity(nums.len() / 2);
                for pair in nums.chunks_exact(2) {
                    let key = t!(i32::from_primitive(pair[0].clone(), resolve));
                    let value = t!(T::from_primitive(pair[1].clone(), resolve));
                    pairs.push((key, value));
                }
                NumberTree {
                    limits,
                    node: NumberTreeNode::Leaf(pairs),
                }
            }
            (None, None) => {
                warn!("neither Kids nor Nums present in number tree node");
                NumberTree {
                    limits,
                    node: NumberTreeNode::Intermediate(vec![]),
                }
            }
        })
    }
}

impl<T: Object + Clone> NumberTree<T> {
    /// Find the value stored under `key`.
    pub fn lookup(&self, r: &impl Resolve, key: i32) -> Result<T> {
        let not_found = || PdfError::NotFound { word: key.to_string() };
        match self.node {
            NumberTreeNode::Leaf(ref items) => items
                .binary_search_by(|&(k, _)| k.cmp(&key))
                .map(|i| items[i].1.clone())
                .map_err(|_| not_found()),
            NumberTreeNode::Intermediate(ref kids) => {
                for &kid_ref in kids {
                    let kid = r.get(kid_ref)?;
                    let (low, high) = match kid.limits {
                        Some(limits) => limits,
                        None => {
                            warn!("number tree node without limits");
                            continue;
                        }
                    };
                    if key < low {
                        return Err(not_found());
                    }
                    if key <= high {
                        return kid.lookup(r, key);
                    }
                }
                Err(not_found())
            }
        }
    }
}

impl<T: Object> NumberTree<T> {
    pub fn walk(&self, r: &impl Resolve, callback: &mut dyn FnMut(i32, &T)) -> Result<()> {
        match self.node {
            NumberTreeNode::Leaf(ref items) => {
                for &(key, ref value) in items {
                    callback(key, value);
                }
            }
            NumberTreeNode::Intermediate(ref items) => {
                for &tree_ref in items {
                    let tree = r.get(tree_ref)?;
                    tree.walk(r, callback)?;
                }
            }
        }
        Ok(())
    }
}
