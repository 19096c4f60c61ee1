use rusqlite::Connection;
use std::cmp::Ordering;

use crate::db;

/// Average a student must strictly exceed across the three trials to be selected.
pub const SELECTION_THRESHOLD: f64 = 35.0;

/// One mark record per student. The trial scores are plain data; `total`,
/// `selected` and `rank` are derived and only change through
/// [`MarkRecord::recompute_aggregate`] and [`assign_ranks`].
#[derive(Debug, Clone)]
pub struct MarkRecord {
    pub id: String,
    pub student_id: String,
    pub tr1: Option<f64>,
    pub tr2: Option<f64>,
    pub tr3: Option<f64>,
    total: f64,
    selected: bool,
    rank: Option<i64>,
}

impl MarkRecord {
    pub fn new(id: String, student_id: String) -> Self {
        Self {
            id,
            student_id,
            tr1: None,
            tr2: None,
            tr3: None,
            total: 0.0,
            selected: false,
            rank: None,
        }
    }

    /// Rehydrate a record from the store. A NULL stored total (a row written
    /// before any aggregation pass) reads as 0 for ranking purposes; the
    /// stored column itself is left untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: String,
        student_id: String,
        tr1: Option<f64>,
        tr2: Option<f64>,
        tr3: Option<f64>,
        total: Option<f64>,
        selected: bool,
        rank: Option<i64>,
    ) -> Self {
        Self {
            id,
            student_id,
            tr1,
            tr2,
            tr3,
            total: total.unwrap_or(0.0),
            selected,
            rank,
        }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    pub fn rank(&self) -> Option<i64> {
        self.rank
    }

    /// Recompute the derived total and selection flag from the trial scores.
    /// A missing trial counts as zero. Selection requires the average to be
    /// strictly above the threshold; exactly 35.0 is not selected. Idempotent.
    pub fn recompute_aggregate(&mut self) {
        let total = self.tr1.unwrap_or(0.0) + self.tr2.unwrap_or(0.0) + self.tr3.unwrap_or(0.0);
        self.total = total;
        self.selected = total / 3.0 > SELECTION_THRESHOLD;
    }
}

fn by_total_desc(a: &MarkRecord, b: &MarkRecord) -> Ordering {
    b.total
        .partial_cmp(&a.total)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.student_id.cmp(&b.student_id))
}

/// Highest total first. Equal totals order by student id so listings and
/// test fixtures are reproducible.
pub fn sort_by_total_desc(records: &mut [MarkRecord]) {
    records.sort_by(by_total_desc);
}

/// Competition ("1224") ranking over the whole record set: tied totals share
/// a rank, and the next distinct total takes its 1-based position in the
/// sorted order rather than the next consecutive integer.
pub fn assign_ranks(records: &mut [MarkRecord]) {
    sort_by_total_desc(records);

    let mut rank: i64 = 1;
    let mut last_total: Option<f64> = None;
    for (i, rec) in records.iter_mut().enumerate() {
        match last_total {
            Some(prev) if rec.total == prev => {}
            Some(_) => rank = i as i64 + 1,
            None => rank = 1,
        }
        rec.rank = Some(rank);
        last_total = Some(rec.total);
    }
}

/// Full-set rank recompute: read every record, rank, write every rank back.
/// An empty store is a no-op. A failed write partway leaves the earlier rank
/// writes in place; callers retry the whole pass.
pub fn update_all_ranks(conn: &Connection) -> rusqlite::Result<()> {
    let mut records = db::marks_all(conn)?;
    if records.is_empty() {
        return Ok(());
    }

    assign_ranks(&mut records);
    for rec in &records {
        if let Some(rank) = rec.rank() {
            db::marks_write_rank(conn, &rec.id, rank)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(student_id: &str, trials: [Option<f64>; 3]) -> MarkRecord {
        let mut rec = MarkRecord::new(format!("mark-{student_id}"), student_id.to_string());
        rec.tr1 = trials[0];
        rec.tr2 = trials[1];
        rec.tr3 = trials[2];
        rec.recompute_aggregate();
        rec
    }

    #[test]
    fn aggregate_treats_missing_trials_as_zero() {
        let rec = record("s1", [Some(20.0), Some(40.0), None]);
        assert_eq!(rec.total(), 60.0);
        assert!(!rec.selected());

        let rec = record("s2", [None, None, None]);
        assert_eq!(rec.total(), 0.0);
        assert!(!rec.selected());
    }

    #[test]
    fn selection_boundary_is_strict() {
        // avg 36.67 => selected
        let rec = record("s1", [Some(20.0), Some(40.0), Some(50.0)]);
        assert_eq!(rec.total(), 110.0);
        assert!(rec.selected());

        // avg exactly 35.0 => not selected
        let rec = record("s2", [Some(35.0), Some(35.0), Some(35.0)]);
        assert_eq!(rec.total(), 105.0);
        assert!(!rec.selected());
    }

    #[test]
    fn aggregate_is_idempotent() {
        let mut rec = record("s1", [Some(12.5), None, Some(30.0)]);
        let (total, selected) = (rec.total(), rec.selected());
        rec.recompute_aggregate();
        assert_eq!(rec.total(), total);
        assert_eq!(rec.selected(), selected);
    }

    #[test]
    fn competition_ranking_shares_and_resumes() {
        let mut records = vec![
            record("a", [Some(90.0), None, None]),
            record("b", [Some(90.0), None, None]),
            record("c", [Some(80.0), None, None]),
            record("d", [Some(70.0), None, None]),
            record("e", [Some(70.0), None, None]),
            record("f", [Some(70.0), None, None]),
        ];
        assign_ranks(&mut records);

        let ranks: Vec<i64> = records.iter().map(|r| r.rank().unwrap()).collect();
        assert_eq!(ranks, vec![1, 1, 3, 4, 4, 4]);
    }

    #[test]
    fn assign_ranks_on_empty_set_is_a_noop() {
        let mut records: Vec<MarkRecord> = Vec::new();
        assign_ranks(&mut records);
        assert!(records.is_empty());
    }

    #[test]
    fn tied_totals_order_by_student_id() {
        let mut records = vec![
            record("zeta", [Some(50.0), None, None]),
            record("alpha", [Some(50.0), None, None]),
            record("mid", [Some(60.0), None, None]),
        ];
        assign_ranks(&mut records);

        let order: Vec<&str> = records.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(order, vec!["mid", "alpha", "zeta"]);
        let ranks: Vec<i64> = records.iter().map(|r| r.rank().unwrap()).collect();
        assert_eq!(ranks, vec![1, 2, 2]);
    }

    #[test]
    fn null_stored_total_ranks_as_zero() {
        let stale = MarkRecord::from_stored(
            "m1".into(),
            "s1".into(),
            None,
            None,
            None,
            None,
            false,
            None,
        );
        let mut records = vec![stale, record("s2", [Some(10.0), None, None])];
        assign_ranks(&mut records);

        assert_eq!(records[0].student_id, "s2");
        assert_eq!(records[0].rank(), Some(1));
        assert_eq!(records[1].rank(), Some(2));
    }
}
