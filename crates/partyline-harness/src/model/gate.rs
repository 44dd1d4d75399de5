//! Reference model of the create/join request gate.
//!
//! The gate keeps only the most recent request of either kind. The model is
//! a single optional slot; the real gate keeps two slots and cancels one
//! when the other is staged, which must be indistinguishable.

use arbitrary::Arbitrary;

/// Request as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRequest {
    /// Create-and-join with this player limit.
    Create {
        /// Player limit.
        max_players: u32,
    },
    /// Join the network with this (model) id.
    Join {
        /// Network id index.
        network: u8,
    },
}

/// Operation on a request gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum GateOp {
    /// Stage a create-and-join.
    Create {
        /// Player limit, offset by one so it is always valid.
        max_players: u8,
    },
    /// Stage a join.
    Join {
        /// Network id index.
        network: u8,
    },
    /// Release the waiting request.
    Release,
    /// Drop the waiting request.
    Cancel,
}

/// Single-slot gate.
#[derive(Debug, Clone, Default)]
pub struct GateModel {
    slot: Option<ModelRequest>,
}

impl GateModel {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `op`, returning what a release let through.
    pub fn apply(&mut self, op: GateOp) -> Option<ModelRequest> {
        match op {
            GateOp::Create { max_players } => {
                self.slot = Some(ModelRequest::Create { max_players: u32::from(max_players) + 1 });
                None
            },
            GateOp::Join { network } => {
                self.slot = Some(ModelRequest::Join { network });
                None
            },
            GateOp::Release => self.slot.take(),
            GateOp::Cancel => {
                self.slot = None;
                None
            },
        }
    }

    /// The waiting request.
    pub fn waiting(&self) -> Option<&ModelRequest> {
        self.slot.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_request_wins() {
        let mut gate = GateModel::new();
        gate.apply(GateOp::Create { max_players: 3 });
        gate.apply(GateOp::Join { network: 9 });

        assert_eq!(gate.apply(GateOp::Release), Some(ModelRequest::Join { network: 9 }));
        assert_eq!(gate.apply(GateOp::Release), None);
    }
}
