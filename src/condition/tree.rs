//! Condition trees
//!
//! A declarative [`Subject`] is resolved once into an arena: nodes refer to each
//! other by index, conditions are kept in a flat list for the periodic update pass,
//! and leaves in a flat list for enumeration. Nothing is ever re-linked after
//! construction, so evaluation always terminates.

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, error, trace};

use super::{Comparison, Condition, ConditionId, SharedConditionListener};
use crate::client::{ClientListener, Listener, ParameterClient};
use crate::error::{CoreError, CoreResult};
use crate::mapping::MappingHandle;

/// Declarative content: a value, a list, or a decision
pub enum Subject<T> {
    Value(T),
    List(Vec<Subject<T>>),
    Condition(Box<ConditionSpec<T>>),
}

/// Declarative condition before it is placed in a tree
pub struct ConditionSpec<T> {
    pub mapping: MappingHandle,
    pub comparison: Comparison,
    pub yes: Subject<T>,
    pub no: Subject<T>,
}

impl<T> Subject<T> {
    pub fn when(mapping: MappingHandle, comparison: Comparison, yes: Subject<T>, no: Subject<T>) -> Self {
        Subject::Condition(Box::new(ConditionSpec {
            mapping,
            comparison,
            yes,
            no,
        }))
    }
}

#[derive(Debug)]
enum Node {
    Leaf(usize),
    List(Vec<usize>),
    Condition(ConditionId),
}

/// Resolved condition tree
pub struct ConditionTree<T> {
    name: String,
    nodes: Vec<Node>,
    leaves: Vec<T>,
    conditions: Vec<Condition>,
    root: usize,
    listeners: Vec<SharedConditionListener>,
}

/// Tree shared between its owner, the updater list and the client's listeners
pub type SharedConditionTree<T> = Rc<RefCell<ConditionTree<T>>>;

impl<T> ConditionTree<T> {
    /// List-permitting tree: any number of leaves may be active
    pub fn new(name: impl Into<String>, subject: Subject<T>) -> CoreResult<Self> {
        Self::build_tree(name.into(), subject, true)
    }

    /// Tree that always resolves to exactly one leaf
    pub fn single(name: impl Into<String>, subject: Subject<T>) -> CoreResult<Self> {
        Self::build_tree(name.into(), subject, false)
    }

    fn build_tree(name: String, subject: Subject<T>, allow_lists: bool) -> CoreResult<Self> {
        let mut tree = Self {
            name,
            nodes: Vec::new(),
            leaves: Vec::new(),
            conditions: Vec::new(),
            root: 0,
            listeners: Vec::new(),
        };
        tree.root = tree.build(subject, allow_lists)?;
        debug!(
            "Condition tree '{}': {} conditions, {} leaves",
            tree.name,
            tree.conditions.len(),
            tree.leaves.len()
        );
        Ok(tree)
    }

    fn build(&mut self, subject: Subject<T>, allow_lists: bool) -> CoreResult<usize> {
        let node = match subject {
            Subject::Value(value) => {
                self.leaves.push(value);
                Node::Leaf(self.leaves.len() - 1)
            }
            Subject::List(items) => {
                if !allow_lists {
                    return Err(CoreError::MixedConditionTree);
                }
                let children = items
                    .into_iter()
                    .map(|item| self.build(item, allow_lists))
                    .collect::<CoreResult<Vec<_>>>()?;
                Node::List(children)
            }
            Subject::Condition(spec) => {
                let ConditionSpec {
                    mapping,
                    comparison,
                    yes,
                    no,
                } = *spec;

                let id = self.conditions.len();
                self.conditions.push(Condition::new(mapping, comparison)?);
                let yes = self.build(yes, allow_lists)?;
                let no = self.build(no, allow_lists)?;
                self.conditions[id].yes = yes;
                self.conditions[id].no = no;
                Node::Condition(id)
            }
        };

        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wrap for registration with updaters and clients
    pub fn into_shared(self) -> SharedConditionTree<T> {
        Rc::new(RefCell::new(self))
    }

    pub fn add_listener(&mut self, listener: SharedConditionListener) {
        self.listeners.push(listener);
    }

    /// Every leaf, active or not, in construction order
    pub fn leaves(&self) -> &[T] {
        &self.leaves
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Currently active leaves in tree order
    pub fn values(&self) -> Vec<&T> {
        let mut values = Vec::new();
        self.collect(self.root, &mut values);
        values
    }

    /// First active leaf (the only one for single-value trees)
    pub fn value(&self) -> Option<&T> {
        let mut node = self.root;
        loop {
            match &self.nodes[node] {
                Node::Leaf(leaf) => return self.leaves.get(*leaf),
                Node::Condition(id) => node = self.branch(*id),
                Node::List(children) => {
                    return children.iter().find_map(|child| {
                        let mut values = Vec::new();
                        self.collect(*child, &mut values);
                        values.into_iter().next()
                    })
                }
            }
        }
    }

    fn branch(&self, id: ConditionId) -> usize {
        let condition = &self.conditions[id];
        if condition.state() {
            condition.yes
        } else {
            condition.no
        }
    }

    fn collect<'a>(&'a self, node: usize, values: &mut Vec<&'a T>) {
        match &self.nodes[node] {
            Node::Leaf(leaf) => values.extend(self.leaves.get(*leaf)),
            Node::List(children) => {
                for child in children {
                    self.collect(*child, values);
                }
            }
            Node::Condition(id) => self.collect(self.branch(*id), values),
        }
    }

    /// Distinct mappings the conditions depend on
    pub fn mappings(&self) -> Vec<MappingHandle> {
        let mut mappings: Vec<MappingHandle> = Vec::new();
        for condition in &self.conditions {
            if !mappings.iter().any(|m| m.same_parameter(condition.mapping())) {
                mappings.push(condition.mapping().clone());
            }
        }
        mappings
    }

    /// Apply `state_for` to every condition over `mapping`, then tell listeners
    /// about the ones that flipped
    fn apply(&mut self, mapping: &MappingHandle, state_for: impl Fn(&Condition) -> Option<bool>) {
        let mut flipped = Vec::new();
        for (id, condition) in self.conditions.iter_mut().enumerate() {
            if !condition.mapping().same_parameter(mapping) {
                continue;
            }
            if let Some(state) = state_for(condition) {
                if condition.set_state(state) {
                    flipped.push((id, state));
                }
            }
        }

        for (id, state) in flipped {
            trace!("Condition {} of '{}' is now {}", id, self.name, state);
            for listener in &self.listeners {
                match listener.try_borrow_mut() {
                    Ok(mut listener) => listener.condition_changed(id, state),
                    Err(_) => error!("Listener of condition tree '{}' is busy", self.name),
                }
            }
        }
    }
}

impl<T> ClientListener for ConditionTree<T> {
    fn parameter_changed(&mut self, mapping: &MappingHandle) {
        let Some(value) = mapping.value() else {
            return;
        };

        let name = self.name.clone();
        self.apply(mapping, |condition| {
            let state = condition.comparison().evaluate(&value);
            if state.is_none() {
                error!(
                    "Condition in '{}' cannot compare {:?} with '{}'",
                    name,
                    value,
                    condition.comparison().name()
                );
            }
            state
        });
    }

    fn request_terminated(&mut self, mapping: &MappingHandle) {
        debug!("'{}' offline, conditions of '{}' fall back to true", mapping.name(), self.name);
        self.apply(mapping, |_| Some(true));
    }
}

/// Participant of the periodic update pass
pub trait Updater {
    fn update(&self, client: &mut dyn ParameterClient);
}

impl<T: 'static> Updater for Rc<RefCell<ConditionTree<T>>> {
    /// Issue a fresh read for every mapping the tree depends on
    fn update(&self, client: &mut dyn ParameterClient) {
        // Collected first: a fresh cache answers synchronously into the tree
        let mappings = self.borrow().mappings();
        let listener: Listener = self.clone();

        for mapping in mappings {
            if let Err(e) = client.request(&mapping, listener.clone()) {
                error!("Condition update for '{}' failed: {}", mapping.name(), e);
            }
        }
    }
}
