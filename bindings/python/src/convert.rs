//! Conversion from Rust results to Python objects.

use freeroot::{CommandResult, Status};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn status_name(status: Status) -> &'static str {
    match status {
        Status::Exited => "exited",
        Status::Signaled => "signaled",
        Status::Timeout => "timeout",
        Status::Cancelled => "cancelled",
    }
}

/// `{"output": str, "exit_code": int, "status": str, "duration": float, "success": bool}`
pub fn result_to_py(py: Python, result: CommandResult) -> PyResult<PyObject> {
    let dict = PyDict::new(py);

    dict.set_item("output", &result.output)?;
    dict.set_item("exit_code", result.exit_code)?;
    dict.set_item("status", status_name(result.status))?;
    dict.set_item("duration", result.duration.as_secs_f64())?;
    dict.set_item("success", result.success())?;

    Ok(dict.into())
}

pub fn optional_result_to_py(py: Python, result: Option<CommandResult>) -> PyResult<PyObject> {
    match result {
        Some(result) => result_to_py(py, result),
        None => Ok(py.None()),
    }
}
