/// Where a node goes when it is inserted or moved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InsertionPosition<Id> {
    /// A new root. In a forest this starts a new tree.
    Root,
    FirstChildOf(Id),
    LastChildOf(Id),
    PrevSiblingOf(Id),
    NextSiblingOf(Id),
}

impl<Id> InsertionPosition<Id> {
    /// Last child of `parent`, or a root when there is none.
    pub fn under(parent: Option<Id>) -> Self {
        match parent {
            Some(parent) => InsertionPosition::LastChildOf(parent),
            None => InsertionPosition::Root,
        }
    }

    /// The node the position is relative to.
    pub fn target(&self) -> Option<&Id> {
        match self {
            InsertionPosition::Root => None,
            InsertionPosition::FirstChildOf(id)
            | InsertionPosition::LastChildOf(id)
            | InsertionPosition::PrevSiblingOf(id)
            | InsertionPosition::NextSiblingOf(id) => Some(id),
        }
    }

    pub fn is_sibling(&self) -> bool {
        matches!(
            self,
            InsertionPosition::PrevSiblingOf(_) | InsertionPosition::NextSiblingOf(_)
        )
    }
}

/// How far `move_up`/`move_down` shift a node among its siblings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MoveSteps {
    By(usize),
    /// To the first or last sibling position.
    All,
}

impl MoveSteps {
    /// Steps clamped to the number of siblings available in that direction.
    pub fn clamp(&self, available: usize) -> usize {
        match self {
            MoveSteps::By(steps) => (*steps).min(available),
            MoveSteps::All => available,
        }
    }
}

impl From<usize> for MoveSteps {
    fn from(steps: usize) -> Self {
        MoveSteps::By(steps)
    }
}
