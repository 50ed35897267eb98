use std::collections::VecDeque;
use tracing::{debug, instrument, trace};

use crate::element::UIElement;
use crate::errors::{AutomationError, WaitError};
use crate::selector::Selector;
use crate::wait::{self, Clock, WaitSpec};

/// Default bound on how deep below the root a search descends
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Order in which a search visits the subtree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchOrder {
    /// Pre-order document walk.
    #[default]
    DepthFirst,
    /// Level by level. Prefers the match closest to the root.
    BreadthFirst,
}

/// Finds elements matching a selector within one subtree.
///
/// Lookups are pure reads of the current tree: they never retry and never
/// sleep. "Not found" is `Ok(None)`. Use [`Locator::wait`] to poll.
#[derive(Clone, Debug)]
pub struct Locator {
    root: UIElement,
    selector: Selector,
    max_depth: usize,
    order: SearchOrder,
}

impl Locator {
    pub fn new(root: UIElement, selector: Selector) -> Self {
        Self {
            root,
            selector,
            max_depth: DEFAULT_MAX_DEPTH,
            order: SearchOrder::default(),
        }
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn order(mut self, order: SearchOrder) -> Self {
        self.order = order;
        self
    }

    /// Shorthand for `order(SearchOrder::BreadthFirst)`.
    pub fn breadth_first(self) -> Self {
        self.order(SearchOrder::BreadthFirst)
    }

    /// Get a nested locator
    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        Locator {
            root: self.root.clone(),
            selector: self.selector.clone().then(selector),
            max_depth: self.max_depth,
            order: self.order,
        }
    }

    /// First match in the locator's [`SearchOrder`], excluding the root itself.
    #[instrument(level = "trace", skip(self), fields(selector = %self.selector))]
    pub fn first(&self) -> Result<Option<UIElement>, AutomationError> {
        let found = self.resolve(&self.selector, true)?;
        Ok(found.into_iter().next())
    }

    /// Every match, in search order.
    pub fn all(&self) -> Result<Vec<UIElement>, AutomationError> {
        self.resolve(&self.selector, false)
    }

    /// Polls [`Locator::first`] until it finds something or `spec` runs out.
    pub fn wait(&self, clock: &dyn Clock, spec: &WaitSpec) -> Result<UIElement, WaitError> {
        debug!("Waiting for element matching selector: {}", self.selector);
        wait::wait_for(clock, spec, || self.first())
    }

    fn resolve(&self, selector: &Selector, first_only: bool) -> Result<Vec<UIElement>, AutomationError> {
        match selector {
            Selector::Role { .. } => {
                let mut out = Vec::new();
                match self.order {
                    SearchOrder::DepthFirst => {
                        collect(&self.root, selector, 0, self.max_depth, first_only, &mut out)?
                    }
                    SearchOrder::BreadthFirst => {
                        collect_by_level(&self.root, selector, self.max_depth, first_only, &mut out)?
                    }
                }
                Ok(out)
            }
            Selector::Has(inner) => {
                // A bare filter applies to the root itself.
                let nested = Locator::new(self.root.clone(), (**inner).clone())
                    .max_depth(self.max_depth)
                    .order(self.order);
                Ok(nested.first()?.map(|_| vec![self.root.clone()]).unwrap_or_default())
            }
            Selector::Chain(steps) => {
                let mut candidates = vec![self.root.clone()];
                let last = steps.len().saturating_sub(1);

                for (i, step) in steps.iter().enumerate() {
                    let only_first = first_only && i == last;
                    let mut next: Vec<UIElement> = Vec::new();
                    for candidate in &candidates {
                        let scoped = Locator::new(candidate.clone(), step.clone())
                            .max_depth(self.max_depth)
                            .order(self.order);
                        for element in scoped.resolve(step, only_first)? {
                            if !next.contains(&element) {
                                next.push(element);
                            }
                        }
                        if only_first && !next.is_empty() {
                            break;
                        }
                    }
                    trace!(step = %step, matches = next.len(), "resolved chain step");
                    if next.is_empty() {
                        return Ok(next);
                    }
                    candidates = next;
                }

                if first_only {
                    candidates.truncate(1);
                }
                Ok(candidates)
            }
        }
    }
}

/// Pre-order walk below `node`. Subtrees that vanish mid-walk are skipped; the
/// tree belongs to another process and changes underneath us.
fn collect(
    node: &UIElement,
    step: &Selector,
    depth: usize,
    max_depth: usize,
    first_only: bool,
    out: &mut Vec<UIElement>,
) -> Result<(), AutomationError> {
    if depth >= max_depth {
        return Ok(());
    }

    let children = match node.children() {
        Ok(children) => children,
        Err(AutomationError::ElementDetached(reason)) if depth > 0 => {
            trace!(%reason, "element vanished during search");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for child in children {
        match step.matches_element(&child) {
            Ok(true) => {
                out.push(child.clone());
                if first_only {
                    return Ok(());
                }
            }
            Ok(false) => {}
            Err(AutomationError::ElementDetached(_)) => continue,
            Err(e) => return Err(e),
        }

        collect(&child, step, depth + 1, max_depth, first_only, out)?;
        if first_only && !out.is_empty() {
            return Ok(());
        }
    }
    Ok(())
}

/// Level-order walk below `root`, with the same skipping rules as [`collect`].
fn collect_by_level(
    root: &UIElement,
    step: &Selector,
    max_depth: usize,
    first_only: bool,
    out: &mut Vec<UIElement>,
) -> Result<(), AutomationError> {
    let mut queue = VecDeque::from([(root.clone(), 0usize)]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let children = match node.children() {
            Ok(children) => children,
            Err(AutomationError::ElementDetached(reason)) if depth > 0 => {
                trace!(%reason, "element vanished during search");
                continue;
            }
            Err(e) => return Err(e),
        };

        for child in children {
            match step.matches_element(&child) {
                Ok(true) => {
                    out.push(child.clone());
                    if first_only {
                        return Ok(());
                    }
                }
                Ok(false) => {}
                Err(AutomationError::ElementDetached(_)) => continue,
                Err(e) => return Err(e),
            }
            queue.push_back((child, depth + 1));
        }
    }
    Ok(())
}
