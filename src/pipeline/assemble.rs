//! Record assembly: metadata + weights + sets → [`CertificateRecord`].
//!
//! Pure composition. Entries keep the reading order the parser saw them in,
//! and nothing is deduplicated here: the parser already guarantees one entry
//! per id per collection and that no entry sits in two collections.

use crate::record::{CertificateMetadata, CertificateRecord, WeightEntry, WeightSet};

#[derive(Debug, Default, Clone, Copy)]
pub struct RecordAssembler;

impl RecordAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(
        &self,
        metadata: CertificateMetadata,
        weights: Vec<WeightEntry>,
        sets: Vec<WeightSet>,
    ) -> CertificateRecord {
        CertificateRecord {
            metadata,
            weights,
            sets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_seen_order() {
        let weights = vec![
            WeightEntry::new("WFS010", 20000.0),
            WeightEntry::new("WFS002", 20000.0),
            WeightEntry::new("WES001", 20000.0),
        ];
        let record = RecordAssembler::new().assemble(CertificateMetadata::default(), weights.clone(), vec![]);
        assert_eq!(record.weights, weights);
    }

    #[test]
    fn parts_survive_a_json_round_trip() {
        let metadata = CertificateMetadata {
            certificate_number: Some("CM-25-181B".into()),
            pages: Some(12),
            calibration_dates: vec!["2025-03-10".into()],
            ..Default::default()
        };
        let weights = vec![WeightEntry::new("WFS001", 20000.0)
            .with_actual(20000.123456789012)
            .with_uncertainty(0.15)];
        let mut set = WeightSet::new("W1");
        set.weights.push(WeightEntry::new("W1-0.5", 0.5).with_actual(0.50001));

        let record = RecordAssembler::new().assemble(metadata.clone(), weights.clone(), vec![set.clone()]);
        let json = record.to_json_pretty().unwrap();
        let back: CertificateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_parts(), (metadata, weights, vec![set]));
    }
}
