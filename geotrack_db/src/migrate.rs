//! Statistics-driven bulk import of an external point sequence.
//!
//! The engine is polymorphic over any finite, indexable [`PointSource`]
//! (the format adapters for CSV, GPX and friends are collaborators providing
//! this capability set). The whole procedure runs under the target store's
//! write lock: scan the target, scan the source, append the points the
//! strategy accepts, scan the target again, and report all four statistics.

use crate::geodb::GeoDb;
use geotrack_core::io::Storage;
use geotrack_core::utils::CancelToken;
use geotrack_core::{DatasetStats, Error, GeoPoint, Result, StatsCollector};

/// A finite, indexable sequence of geographic points.
pub trait PointSource {
	fn count(&self) -> u32;
	fn at(&self, index: u32) -> Result<GeoPoint>;
}

impl PointSource for Vec<GeoPoint> {
	fn count(&self) -> u32 {
		self.len().min(u32::MAX as usize) as u32
	}

	fn at(&self, index: u32) -> Result<GeoPoint> {
		self
			.get(index as usize)
			.copied()
			.ok_or_else(|| Error::not_found(format!("source index {index} out of range")))
	}
}

/// Which source points are taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
	/// Never migrate; the report still carries all statistics.
	None,
	/// Migrate every source point.
	All,
	/// Migrate only points strictly newer than the target's latest timestamp.
	Newer,
}

/// Before/source/imported/after statistics of one migration run.
///
/// A failed run still produces the report; `error` carries what stopped it.
/// Already-appended records stay in place (forward progress, no rollback).
#[derive(Debug, Default)]
pub struct MigrationReport {
	pub before: DatasetStats,
	pub source: DatasetStats,
	pub imported: DatasetStats,
	pub after: DatasetStats,
	pub error: Option<Error>,
}

impl MigrationReport {
	pub fn is_clean(&self) -> bool {
		self.error.is_none()
	}
}

/// Runs one migration under the target's write lock.
pub fn migrate<S: Storage>(
	db: &GeoDb<S>,
	source: &dyn PointSource,
	strategy: Strategy,
	cancel: &CancelToken,
) -> MigrationReport {
	let mut state = db.state.write();
	let mut report = MigrationReport::default();

	match state.scan_stats(cancel) {
		Ok(stats) => report.before = stats,
		Err(error) => {
			report.error = Some(error);
			return report;
		}
	}

	let mut collector = StatsCollector::new();
	for index in 0..source.count() {
		if let Err(error) = cancel.check() {
			report.error = Some(error);
			return report;
		}
		match source.at(index) {
			Ok(point) => collector.observe(point.timestamp_ms),
			Err(error) => {
				report.source = collector.finish();
				report.error = Some(error);
				return report;
			}
		}
	}
	report.source = collector.finish();

	let threshold = report.before.latest_ts;
	let mut collector = StatsCollector::new();
	for index in 0..source.count() {
		if let Err(error) = cancel.check() {
			report.error = Some(error);
			break;
		}
		let point = match source.at(index) {
			Ok(point) => point,
			Err(error) => {
				report.error = Some(error);
				break;
			}
		};
		let accepted = match strategy {
			Strategy::None => false,
			Strategy::All => true,
			Strategy::Newer => point.timestamp_ms > threshold,
		};
		if !accepted {
			continue;
		}
		if let Err(error) = state.append_record(&point) {
			report.error = Some(error);
			break;
		}
		collector.observe(point.timestamp_ms);
	}
	report.imported = collector.finish();

	match state.scan_stats(cancel) {
		Ok(stats) => report.after = stats,
		Err(error) => {
			if report.error.is_none() {
				report.error = Some(error);
			}
		}
	}

	log::debug!(
		"migration finished: {} of {} source points imported, {} total",
		report.imported.count,
		report.source.count,
		report.after.count
	);
	report
}
