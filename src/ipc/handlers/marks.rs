use crate::calc::{self, MarkRecord};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::sync::PoisonError;
use uuid::Uuid;

const TRIAL_KEYS: [&str; 3] = ["tr1", "tr2", "tr3"];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

/// Lenient score read: JSON numbers pass through, numeric strings parse, and
/// anything else reads as "not set" for that key rather than failing the
/// request.
fn coerce_score(value: &serde_json::Value) -> Option<f64> {
    if let Some(v) = value.as_f64() {
        return Some(v);
    }
    value.as_str().and_then(|s| s.trim().parse::<f64>().ok())
}

fn has_trial_key(params: &serde_json::Value) -> bool {
    TRIAL_KEYS.iter().any(|k| params.get(k).is_some())
}

/// Apply whichever trial keys the request carries onto the record. Absent
/// keys leave the stored value alone; a key with an uninterpretable value
/// changes nothing for that trial.
fn apply_trial_params(rec: &mut MarkRecord, params: &serde_json::Value) {
    if let Some(v) = params.get("tr1").and_then(coerce_score) {
        rec.tr1 = Some(v);
    }
    if let Some(v) = params.get("tr2").and_then(coerce_score) {
        rec.tr2 = Some(v);
    }
    if let Some(v) = params.get("tr3").and_then(coerce_score) {
        rec.tr3 = Some(v);
    }
}

fn mark_json(rec: &MarkRecord, student: Option<&db::Student>) -> serde_json::Value {
    json!({
        "id": rec.id,
        "student": student.map(|s| json!({
            "id": s.id,
            "name": s.name,
            "email": s.email,
        })),
        "tr1": rec.tr1,
        "tr2": rec.tr2,
        "tr3": rec.tr3,
        "total": rec.total(),
        "selected": rec.selected(),
        "rank": rec.rank(),
    })
}

/// Aggregate-then-persist-then-full-rank-recompute, the one sequential unit
/// of work every submission runs. The rank pass holds the state's rank lock
/// so two passes never interleave their read-sort-write cycles.
fn persist_and_rerank(
    state: &AppState,
    conn: &Connection,
    rec: &mut MarkRecord,
) -> Result<(), HandlerErr> {
    rec.recompute_aggregate();
    db::marks_upsert(conn, rec).map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "marks" })),
    })?;

    let _guard = state
        .rank_lock
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    calc::update_all_ranks(conn).map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "marks" })),
    })
}

fn enriched_response(
    req_id: &str,
    conn: &Connection,
    student: &db::Student,
) -> serde_json::Value {
    // Re-read to pick up the rank the full pass just assigned.
    match db::marks_find_by_student(conn, &student.id) {
        Ok(Some(rec)) => ok(req_id, json!({ "marks": mark_json(&rec, Some(student)) })),
        Ok(None) => err(req_id, "not_found", "marks not found after save", None),
        Err(e) => err(req_id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let student = match db::student_find_by_id(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match db::marks_find_by_student(conn, &student_id) {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "conflict",
                "marks already exist for this student; use marks.update",
                None,
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if !has_trial_key(&req.params) {
        return err(&req.id, "bad_params", "no marks data provided", None);
    }

    let mut rec = MarkRecord::new(Uuid::new_v4().to_string(), student_id);
    apply_trial_params(&mut rec, &req.params);

    if let Err(e) = persist_and_rerank(state, conn, &mut rec) {
        return e.response(&req.id);
    }
    enriched_response(&req.id, conn, &student)
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut rec = match db::marks_find_by_student(conn, &student_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "marks not found for this student", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if !has_trial_key(&req.params) {
        return err(&req.id, "bad_params", "no marks data provided", None);
    }

    let student = match db::student_find_by_id(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    apply_trial_params(&mut rec, &req.params);

    if let Err(e) = persist_and_rerank(state, conn, &mut rec) {
        return e.response(&req.id);
    }
    enriched_response(&req.id, conn, &student)
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let rec = match db::marks_find_by_student(conn, &student_id) {
        Ok(Some(r)) => r,
        // Absent marks are an answer, not an error.
        Ok(None) => return ok(&req.id, json!({ "marks": null })),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student = match db::student_find_by_id(conn, &student_id) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "marks": mark_json(&rec, student.as_ref()) }),
    )
}

fn handle_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut records = match db::marks_all(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Ordered by live totals; the listing never trusts stored rank staleness.
    calc::sort_by_total_desc(&mut records);

    let students: HashMap<String, db::Student> = match db::students_all(conn) {
        Ok(v) => v.into_iter().map(|s| (s.id.clone(), s)).collect(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let roster: Vec<_> = records
        .iter()
        .map(|r| mark_json(r, students.get(&r.student_id)))
        .collect();
    ok(&req.id, json!({ "roster": roster }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.add" => Some(handle_add(state, req)),
        "marks.update" => Some(handle_update(state, req)),
        "marks.get" => Some(handle_get(state, req)),
        "marks.roster" => Some(handle_roster(state, req)),
        _ => None,
    }
}
