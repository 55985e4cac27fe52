//! Detection policies judging the tags of the address registers of a memory read.

use super::operand_resolver::MemoryReadOperand;
use crate::prelude::*;
use crate::taint::{TagModel, TaggedLocation};
use itertools::Itertools;

/// The kind of detection policy used by a check module.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum PolicyKind {
    /// Report if the sum of all sub-slot tags of the 64-bit base and index registers is nonzero.
    TagSum,
    /// Report if a sub-slot of the full-width index register carries the sentinel tag.
    SentinelMatch,
}

/// A detection policy, ready to be evaluated at a sink.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum DetectionPolicy {
    /// See [`PolicyKind::TagSum`].
    TagSum,
    /// See [`PolicyKind::SentinelMatch`]. Contains the sentinel tag.
    SentinelMatch(Tag),
}

/// The role of a register in the effective address computation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum RegisterRole {
    Base,
    Index,
}

impl std::fmt::Display for RegisterRole {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterRole::Base => write!(formatter, "base"),
            RegisterRole::Index => write!(formatter, "index"),
        }
    }
}

/// A tainted register found at a sink.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct RegisterFinding {
    /// The role of the register in the address computation.
    pub role: RegisterRole,
    /// The register as it appears in the instruction.
    pub register: Register,
    /// The tags of the sub-slots of the full-width register that were read.
    pub tags: Vec<Tag>,
    /// The sub-slot that matched the sentinel tag, if the policy looks for one.
    pub matched_slot: Option<usize>,
}

impl std::fmt::Display for RegisterFinding {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{} register {} (tags {})",
            self.role,
            self.register,
            self.tags.iter().join(", ")
        )?;
        if let Some(slot) = self.matched_slot {
            write!(formatter, " at byte {}", slot)?;
        }
        Ok(())
    }
}

/// The result of a triggered detection policy.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Detection {
    /// The registers responsible for the detection.
    pub findings: Vec<RegisterFinding>,
}

impl Detection {
    /// The names of the registers responsible for the detection.
    pub fn registers(&self) -> Vec<String> {
        self.findings
            .iter()
            .map(|finding| finding.register.to_string())
            .collect()
    }

    /// A `[role, register, tags]` triple for each finding.
    pub fn details(&self) -> Vec<Vec<String>> {
        self.findings
            .iter()
            .map(|finding| {
                vec![
                    finding.role.to_string(),
                    finding.register.to_string(),
                    finding.tags.iter().join(", "),
                ]
            })
            .collect()
    }
}

impl std::fmt::Display for Detection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.findings.iter().join(" and "))
    }
}

impl DetectionPolicy {
    /// Create the policy of the given kind.
    /// The sentinel tag is ignored by policies that do not need one.
    pub fn new(kind: PolicyKind, sentinel: Tag) -> DetectionPolicy {
        match kind {
            PolicyKind::TagSum => DetectionPolicy::TagSum,
            PolicyKind::SentinelMatch => DetectionPolicy::SentinelMatch(sentinel),
        }
    }

    /// Check the current tags of the address registers of a memory read executed by `thread`.
    ///
    /// Returns `None` if the memory read is not considered tainted.
    pub fn evaluate(
        &self,
        model: &TagModel,
        thread: ThreadId,
        operand: &MemoryReadOperand,
    ) -> Option<Detection> {
        match *self {
            DetectionPolicy::TagSum => {
                // Every width of a register shares the slots of its 64-bit parent.
                let base_tags = model.register_tags(thread, operand.base.full_width());
                let index_tags = model.register_tags(thread, operand.index.full_width());
                let sum: u64 = base_tags
                    .iter()
                    .chain(index_tags.iter())
                    .map(|tag| u64::from(u32::from(*tag)))
                    .sum();
                if sum == 0 {
                    return None;
                }
                let findings = [
                    (RegisterRole::Base, operand.base, base_tags),
                    (RegisterRole::Index, operand.index, index_tags),
                ]
                .into_iter()
                .filter(|(_, _, tags)| tags.iter().any(|tag| tag.is_tainted()))
                .map(|(role, register, tags)| RegisterFinding {
                    role,
                    register,
                    tags,
                    matched_slot: None,
                })
                .collect();
                Some(Detection { findings })
            }
            DetectionPolicy::SentinelMatch(sentinel) => {
                let index = operand.index.full_width();
                let (family, slots) = index.tag_slots()?;
                let matched_slot = slots.into_iter().find(|slot| {
                    model.read(&TaggedLocation::RegisterSlot {
                        thread,
                        register: family,
                        slot: *slot,
                    }) == sentinel
                })?;
                Some(Detection {
                    findings: vec![RegisterFinding {
                        role: RegisterRole::Index,
                        register: index,
                        tags: vec![sentinel],
                        matched_slot: Some(matched_slot),
                    }],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::RegisterFamily;
    use crate::taint::shadow::ShadowStorage;
    use std::sync::Arc;

    fn setup() -> (TagModel, ThreadId) {
        (
            TagModel::new(Arc::new(ShadowStorage::new())),
            ThreadId::new(1),
        )
    }

    fn operand(base: &str, index: &str) -> MemoryReadOperand {
        MemoryReadOperand {
            base: base.parse().unwrap(),
            index: index.parse().unwrap(),
        }
    }

    fn taint(model: &TagModel, thread: ThreadId, register: &str, tag: u32) {
        model.write(
            &TaggedLocation::Register {
                thread,
                register: register.parse().unwrap(),
            },
            Tag::new(tag),
        );
    }

    #[test]
    fn tag_sum_untainted() {
        let (model, thread) = setup();
        let operand = operand("rbx", "rcx");
        assert_eq!(DetectionPolicy::TagSum.evaluate(&model, thread, &operand), None);
    }

    #[test]
    fn tag_sum_monotonicity() {
        let (model, thread) = setup();
        let operand = operand("rbx", "rcx");
        taint(&model, thread, "rbx", 2);
        let detection = DetectionPolicy::TagSum
            .evaluate(&model, thread, &operand)
            .unwrap();
        assert_eq!(detection.registers(), vec!["rbx".to_string()]);
        assert_eq!(detection.findings[0].role, RegisterRole::Base);

        // Tainting the index as well never removes the detection.
        taint(&model, thread, "rcx", 3);
        let detection = DetectionPolicy::TagSum
            .evaluate(&model, thread, &operand)
            .unwrap();
        assert_eq!(
            detection.registers(),
            vec!["rbx".to_string(), "rcx".to_string()]
        );
        assert_eq!(
            format!("{}", detection),
            "base register rbx (tags 2, 2, 2, 2, 2, 2, 2, 2) and index register rcx (tags 3, 3, 3, 3, 3, 3, 3, 3)"
        );
    }

    #[test]
    fn tag_sum_reads_parent_register() {
        let (model, thread) = setup();
        // Only the upper half of rcx is tainted, which is not part of ecx.
        for slot in 4..8 {
            model.write(
                &TaggedLocation::RegisterSlot {
                    thread,
                    register: RegisterFamily::Rcx,
                    slot,
                },
                Tag::new(3),
            );
        }
        let detection = DetectionPolicy::TagSum
            .evaluate(&model, thread, &operand("rbx", "ecx"))
            .unwrap();
        assert_eq!(detection.findings.len(), 1);
        assert_eq!(detection.findings[0].role, RegisterRole::Index);
        assert_eq!(detection.findings[0].register, "ecx".parse().unwrap());
        assert_eq!(
            format!("{}", detection),
            "index register ecx (tags 0, 0, 0, 0, 3, 3, 3, 3)"
        );

        let detection = DetectionPolicy::TagSum
            .evaluate(&model, thread, &operand("rcx", "rdx"))
            .unwrap();
        assert_eq!(detection.registers(), vec!["rcx".to_string()]);
        assert_eq!(
            DetectionPolicy::TagSum.evaluate(&model, thread, &operand("rbx", "dl")),
            None
        );
    }

    #[test]
    fn tag_sum_other_thread() {
        let (model, thread) = setup();
        taint(&model, thread, "rbx", 2);
        let operand = operand("rbx", "rcx");
        assert_eq!(
            DetectionPolicy::TagSum.evaluate(&model, ThreadId::new(2), &operand),
            None
        );
    }

    #[test]
    fn sentinel_exactness() {
        let (model, thread) = setup();
        let policy = DetectionPolicy::new(PolicyKind::SentinelMatch, Tag::new(1));
        let operand = operand("rbx", "rcx");

        taint(&model, thread, "rcx", 2);
        assert_eq!(policy.evaluate(&model, thread, &operand), None);

        // The base register is never read.
        taint(&model, thread, "rbx", 1);
        assert_eq!(policy.evaluate(&model, thread, &operand), None);

        model.write(
            &TaggedLocation::RegisterSlot {
                thread,
                register: RegisterFamily::Rcx,
                slot: 3,
            },
            Tag::new(1),
        );
        let detection = policy.evaluate(&model, thread, &operand).unwrap();
        assert_eq!(
            detection.findings,
            vec![RegisterFinding {
                role: RegisterRole::Index,
                register: "rcx".parse().unwrap(),
                tags: vec![Tag::new(1)],
                matched_slot: Some(3),
            }]
        );
        assert_eq!(
            detection.details(),
            vec![vec!["index".to_string(), "rcx".to_string(), "1".to_string()]]
        );
    }

    #[test]
    fn sentinel_reads_full_width_index() {
        let (model, thread) = setup();
        let policy = DetectionPolicy::SentinelMatch(Tag::new(1));
        model.write(
            &TaggedLocation::RegisterSlot {
                thread,
                register: RegisterFamily::Rcx,
                slot: 7,
            },
            Tag::new(1),
        );
        let detection = policy.evaluate(&model, thread, &operand("rbx", "cl")).unwrap();
        assert_eq!(detection.findings[0].register, "rcx".parse().unwrap());
        assert_eq!(detection.findings[0].matched_slot, Some(7));
    }

    #[test]
    fn policy_kinds() {
        assert_eq!(
            DetectionPolicy::new(PolicyKind::TagSum, Tag::new(5)),
            DetectionPolicy::TagSum
        );
        assert_eq!(
            DetectionPolicy::new(PolicyKind::SentinelMatch, Tag::new(5)),
            DetectionPolicy::SentinelMatch(Tag::new(5))
        );
    }
}
