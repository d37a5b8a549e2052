//! Planned mutations for one zone
//!
//! A [`ChangeSet`] is built fresh by the reconciler on every pass and never
//! persisted. Its changes are kept in apply order:
//!
//! 1. notify-list creates
//! 2. monitor creates and updates
//! 3. record creates and updates
//! 4. record deletes
//! 5. monitor releases (which delete dedicated notify lists they orphan)
//!
//! The zone itself, when missing, is created before any of these.

use std::fmt;

use crate::model::{Record, Zone};
use crate::monitor::{Claimant, Fingerprint, MonitorSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// What a change touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Zone,
    Record,
    /// A record carrying a filter chain (dynamic on either side)
    FilterChain,
    Monitor,
    NotifyList,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Zone => "zone",
            ResourceKind::Record => "record",
            ResourceKind::FilterChain => "dynamic record",
            ResourceKind::Monitor => "monitor",
            ResourceKind::NotifyList => "notify list",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    /// For deletes, `record` is the live record being removed
    Record {
        record: Record,
        existing: Option<Record>,
    },
    /// Create/update carry the spec; delete releases `claimant`'s claim
    Monitor {
        fingerprint: Fingerprint,
        spec: Option<MonitorSpec>,
        claimant: Claimant,
    },
    NotifyList {
        name: String,
    },
}

/// One planned mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub operation: Operation,
    pub resource: Resource,
}

impl Change {
    pub fn record(operation: Operation, record: Record, existing: Option<Record>) -> Self {
        Self {
            operation,
            resource: Resource::Record { record, existing },
        }
    }

    pub fn ensure_monitor(operation: Operation, spec: MonitorSpec, claimant: Claimant) -> Self {
        Self {
            operation,
            resource: Resource::Monitor {
                fingerprint: spec.fingerprint.clone(),
                spec: Some(spec),
                claimant,
            },
        }
    }

    pub fn release_monitor(fingerprint: Fingerprint, claimant: Claimant) -> Self {
        Self {
            operation: Operation::Delete,
            resource: Resource::Monitor {
                fingerprint,
                spec: None,
                claimant,
            },
        }
    }

    pub fn create_notify_list(name: impl Into<String>) -> Self {
        Self {
            operation: Operation::Create,
            resource: Resource::NotifyList { name: name.into() },
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match &self.resource {
            Resource::Record { record, existing } => {
                let dynamic = record.is_dynamic()
                    || existing.as_ref().is_some_and(|existing| existing.is_dynamic());
                if dynamic {
                    ResourceKind::FilterChain
                } else {
                    ResourceKind::Record
                }
            }
            Resource::Monitor { .. } => ResourceKind::Monitor,
            Resource::NotifyList { .. } => ResourceKind::NotifyList,
        }
    }

    /// Position in the apply order
    pub fn phase(&self) -> u8 {
        match (&self.resource, self.operation) {
            (Resource::NotifyList { .. }, _) => 0,
            (Resource::Monitor { .. }, Operation::Create | Operation::Update) => 1,
            (Resource::Record { .. }, Operation::Create | Operation::Update) => 2,
            (Resource::Record { .. }, Operation::Delete) => 3,
            (Resource::Monitor { .. }, Operation::Delete) => 4,
        }
    }

    /// Whether applying this change writes a dynamic record
    pub fn writes_dynamic_record(&self) -> bool {
        matches!(
            &self.resource,
            Resource::Record { record, .. }
                if record.is_dynamic() && self.operation != Operation::Delete
        )
    }

    /// Short human description, e.g. `create record www A`
    pub fn description(&self) -> String {
        let target = match &self.resource {
            Resource::Record { record, .. } => record.key().to_string(),
            Resource::Monitor {
                spec: Some(spec), ..
            } => spec.job.name.clone(),
            Resource::Monitor {
                fingerprint,
                claimant,
                spec: None,
            } => format!("{} for {}", fingerprint.short(), claimant.record),
            Resource::NotifyList { name } => name.clone(),
        };
        format!("{} {} {}", self.operation, self.kind(), target)
    }
}

/// Ordered mutations for one zone
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Desired zone the changes were planned from
    pub zone: Zone,

    /// The zone does not exist remotely yet
    pub create_zone: bool,

    pub changes: Vec<Change>,

    /// Monitor references held by this zone's records, live and desired
    pub references: Vec<(Fingerprint, Claimant)>,
}

impl ChangeSet {
    pub fn new(zone: Zone, create_zone: bool) -> Self {
        Self {
            zone,
            create_zone,
            changes: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Add a change, keeping apply order
    pub fn push(&mut self, change: Change) {
        let phase = change.phase();
        let at = self
            .changes
            .iter()
            .position(|existing| existing.phase() > phase)
            .unwrap_or(self.changes.len());
        self.changes.insert(at, change);
    }

    pub fn is_empty(&self) -> bool {
        !self.create_zone && self.changes.is_empty()
    }

    /// Number of changes of one kind and operation
    pub fn count(&self, kind: ResourceKind, operation: Operation) -> usize {
        self.changes
            .iter()
            .filter(|change| change.kind() == kind && change.operation == operation)
            .count()
    }
}
