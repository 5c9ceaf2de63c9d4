//! Checkpointing of trained statistics.
//!
//! Only raw counts are persisted. The kernel-smoothing transform is not
//! invertible, so a finished statistic refuses serialization and a blob
//! flagged as finished refuses to load as training input; the smoothing
//! is always re-applied after reload. Writes go through a sibling
//! temporary file and a rename so a crash mid-write never leaves a
//! truncated checkpoint behind.

use crate::fapfar::RankingStatPdf;
use crate::stats::{DensityParams, RankingStat, RankingStatVariant, SnrChiPdf};
use crate::{horizon::HorizonHistories, rates::TriggerRates};
use gwc_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

/// On-disk format version; bumped on any incompatible layout change.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized form of a trained [`RankingStat`].
#[derive(Debug, Serialize, Deserialize)]
pub struct RankingStatBlob {
    pub version: u32,
    pub finished: bool,
    pub params: DensityParams,
    pub noise_counts: HashMap<String, Vec<f64>>,
    pub zerolag_counts: HashMap<String, Vec<f64>>,
    pub signal_counts: Vec<f64>,
    pub rates: TriggerRates,
    pub horizons: HorizonHistories,
}

impl RankingStatBlob {
    /// Snapshot a trained, unfinished statistic.
    pub fn from_stat(stat: &RankingStat) -> Result<Self> {
        if stat.variant() != RankingStatVariant::Trained {
            return Err(Error::Incompatible(format!(
                "only trained statistics persist, not {:?}",
                stat.variant()
            )));
        }
        if stat.is_finished() {
            return Err(Error::Finished("serialize"));
        }
        let collect = |set: &crate::stats::DensitySet| -> HashMap<String, Vec<f64>> {
            set.densities()
                .map(|(ifo, pdf)| (ifo.clone(), pdf.counts().to_vec()))
                .collect()
        };
        Ok(RankingStatBlob {
            version: FORMAT_VERSION,
            finished: false,
            params: stat.params().clone(),
            noise_counts: collect(stat.denominator.surfaces()),
            zerolag_counts: collect(&stat.zerolag),
            signal_counts: stat.numerator.surface().counts().to_vec(),
            rates: stat.denominator.rates_snapshot(),
            horizons: stat.numerator.horizons_snapshot(),
        })
    }

    /// Rebuild a trained statistic from the snapshot.
    pub fn into_stat(self) -> Result<RankingStat> {
        if self.version != FORMAT_VERSION {
            return Err(Error::BlobVersion {
                found: self.version,
                expected: FORMAT_VERSION,
            });
        }
        if self.finished {
            return Err(Error::FinishedBlobAsInput);
        }
        let mut stat = RankingStat::new(self.params);
        for (ifo, counts) in self.noise_counts {
            let pdf = stat
                .denominator
                .surfaces_mut()
                .density_mut(&ifo)
                .ok_or_else(|| Error::Incompatible(format!("unknown instrument {ifo}")))?;
            *pdf = SnrChiPdf::from_counts(counts)?;
        }
        for (ifo, counts) in self.zerolag_counts {
            let pdf = stat
                .zerolag
                .density_mut(&ifo)
                .ok_or_else(|| Error::Incompatible(format!("unknown instrument {ifo}")))?;
            *pdf = SnrChiPdf::from_counts(counts)?;
        }
        *stat.numerator.surface_mut() = SnrChiPdf::from_counts(self.signal_counts)?;
        stat.denominator
            .rates_handle()
            .write()
            .expect("rates lock poisoned")
            .merge(&self.rates);
        stat.numerator
            .horizons_handle()
            .write()
            .expect("horizons lock poisoned")
            .merge(&self.horizons);
        Ok(stat)
    }
}

/// Serialized form of the background histogram.
#[derive(Debug, Serialize, Deserialize)]
pub struct RankingStatPdfBlob {
    pub version: u32,
    pub pdf: RankingStatPdf,
}

impl RankingStatPdfBlob {
    pub fn new(pdf: RankingStatPdf) -> Self {
        RankingStatPdfBlob {
            version: FORMAT_VERSION,
            pdf,
        }
    }

    pub fn into_pdf(self) -> Result<RankingStatPdf> {
        if self.version != FORMAT_VERSION {
            return Err(Error::BlobVersion {
                found: self.version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(self.pdf)
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        serde_json::to_writer(BufWriter::new(file), value)
            .map_err(|e| Error::Serialize(e.to_string()))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn save_ranking_stat(path: &Path, stat: &RankingStat) -> Result<()> {
    let blob = RankingStatBlob::from_stat(stat)?;
    write_atomic(path, &blob)?;
    info!(path = %path.display(), "ranking statistic checkpoint written");
    Ok(())
}

pub fn load_ranking_stat(path: &Path) -> Result<RankingStat> {
    let file = File::open(path)?;
    let blob: RankingStatBlob = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Serialize(e.to_string()))?;
    blob.into_stat()
}

pub fn save_ranking_stat_pdf(path: &Path, pdf: &RankingStatPdf) -> Result<()> {
    let blob = RankingStatPdfBlob::new(pdf.clone());
    write_atomic(path, &blob)?;
    info!(path = %path.display(), "background histogram checkpoint written");
    Ok(())
}

pub fn load_ranking_stat_pdf(path: &Path) -> Result<RankingStatPdf> {
    let file = File::open(path)?;
    let blob: RankingStatPdfBlob = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Serialize(e.to_string()))?;
    blob.into_pdf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwc_common::{GpsTime, NetworkConfig, Segment, Trigger, TriggerId};
    use std::collections::BTreeSet;

    fn params() -> DensityParams {
        DensityParams::new(BTreeSet::from([1, 2]), NetworkConfig::hl(0.005)).unwrap()
    }

    fn trained() -> RankingStat {
        let mut stat = RankingStat::new(params());
        stat.increment_noise(&Trigger {
            id: TriggerId(1),
            ifo: "H1".into(),
            end: GpsTime::from_secs_f64(100.0),
            snr: 8.0,
            chisq: 1.28,
            chisq_dof: 10,
            template_id: 1,
            aux: None,
        })
        .unwrap();
        stat.add_ratebin("H1", Segment::new(0.0, 100.0), 50.0).unwrap();
        stat.set_horizon("H1", 0.0, 120.0).unwrap();
        stat
    }

    #[test]
    fn test_round_trip_preserves_counts() {
        let stat = trained();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stat.json");
        save_ranking_stat(&path, &stat).unwrap();
        let loaded = load_ranking_stat(&path).unwrap();
        assert_eq!(
            loaded.denominator.surfaces().density("H1").unwrap().total(),
            1.0
        );
        assert_eq!(
            loaded.denominator.rates_snapshot().get("H1").unwrap().total_count(),
            50.0
        );
        assert_eq!(
            loaded.numerator.horizons_snapshot().get("H1").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_finished_stat_refuses_serialization() {
        let mut stat = trained();
        stat.finish().unwrap();
        assert!(matches!(
            RankingStatBlob::from_stat(&stat),
            Err(Error::Finished(_))
        ));
    }

    #[test]
    fn test_finished_blob_refuses_load() {
        let mut blob = RankingStatBlob::from_stat(&trained()).unwrap();
        blob.finished = true;
        assert!(matches!(
            blob.into_stat(),
            Err(Error::FinishedBlobAsInput)
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut blob = RankingStatBlob::from_stat(&trained()).unwrap();
        blob.version = 99;
        assert!(matches!(
            blob.into_stat(),
            Err(Error::BlobVersion {
                found: 99,
                expected: FORMAT_VERSION
            })
        ));
    }

    #[test]
    fn test_dataless_refuses_serialization() {
        let stat = RankingStat::dataless(params()).unwrap();
        assert!(matches!(
            RankingStatBlob::from_stat(&stat),
            Err(Error::Incompatible(_))
        ));
    }

    #[test]
    fn test_pdf_round_trip() {
        let mut pdf = RankingStatPdf::new();
        pdf.count_noise(3.0, 7.0);
        pdf.count_zero_lag(5.0);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdf.json");
        save_ranking_stat_pdf(&path, &pdf).unwrap();
        let loaded = load_ranking_stat_pdf(&path).unwrap();
        assert_eq!(loaded, pdf);
    }
}
