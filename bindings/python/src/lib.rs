//! PyO3 bindings for freeroot.
//!
//! Exposes `setup()` and `Session` as `freeroot._core`. Commands release the
//! GIL while they run.

use std::path::PathBuf;
use std::time::Duration;

use freeroot::{Config, RunOptions};
use pyo3::prelude::*;

mod convert;
mod error;

/// An Ubuntu rootfs under PRoot.
#[pyclass(module = "freeroot._core")]
struct Session {
    inner: freeroot::Session,
}

#[pymethods]
impl Session {
    /// Run a shell command and return a result dict.
    ///
    /// Args:
    ///     cmd (str): Command text for the guest shell
    ///     timeout (float | None): Seconds before the command is killed
    ///
    /// Returns:
    ///     dict: output, exit_code, status, duration, success
    #[pyo3(signature = (cmd, timeout=None))]
    fn run_command(&mut self, py: Python, cmd: &str, timeout: Option<f64>) -> PyResult<PyObject> {
        let opts = run_options(timeout)?;
        let inner = &mut self.inner;
        let result = py
            .allow_threads(|| inner.run_command_with(cmd, &opts))
            .map_err(error::into_pyerr)?;
        convert::result_to_py(py, result)
    }

    /// Shallow-clone a git repository inside the rootfs.
    #[pyo3(signature = (url, target_dir=None, branch=None))]
    fn clone_repo(
        &mut self,
        py: Python,
        url: &str,
        target_dir: Option<&str>,
        branch: Option<&str>,
    ) -> PyResult<PyObject> {
        let inner = &mut self.inner;
        let result = py
            .allow_threads(|| inner.clone_repo(url, target_dir, branch))
            .map_err(error::into_pyerr)?;
        convert::result_to_py(py, result)
    }

    /// Start a shell fed through `write_stdin`.
    fn spawn_shell(&mut self) -> PyResult<()> {
        self.inner.spawn_shell().map_err(error::into_pyerr)
    }

    fn write_stdin(&mut self, data: &str) -> PyResult<()> {
        self.inner
            .write_stdin(data.as_bytes())
            .map_err(error::into_pyerr)
    }

    /// Close the piped shell; returns its result dict, or None.
    fn close_shell(&mut self, py: Python) -> PyResult<PyObject> {
        let inner = &mut self.inner;
        let result = py
            .allow_threads(|| inner.close_shell())
            .map_err(error::into_pyerr)?;
        convert::optional_result_to_py(py, result)
    }

    /// Kill the piped shell and delete the rootfs. Safe to call twice.
    fn cleanup(&mut self) -> PyResult<()> {
        self.inner.cleanup().map_err(error::into_pyerr)
    }

    #[getter]
    fn path(&self) -> PathBuf {
        self.inner.path().to_path_buf()
    }

    #[getter]
    fn arch(&self) -> String {
        self.inner.arch().to_string()
    }

    #[getter]
    fn state(&self) -> String {
        format!("{:?}", self.inner.state()).to_lowercase()
    }

    #[getter]
    fn last_status(&self) -> Option<i32> {
        self.inner.last_status()
    }

    fn __repr__(&self) -> String {
        format!(
            "Session(path={:?}, arch={}, state={})",
            self.inner.path(),
            self.arch(),
            self.state()
        )
    }
}

fn run_options(timeout: Option<f64>) -> PyResult<RunOptions> {
    let mut opts = RunOptions::new();
    if let Some(secs) = timeout {
        if !secs.is_finite() || secs < 0.0 {
            return Err(pyo3::exceptions::PyValueError::new_err(
                "timeout must be a non-negative number of seconds",
            ));
        }
        opts = opts.timeout(Duration::from_secs_f64(secs));
    }
    Ok(opts)
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    /// Provision the rootfs (if needed) and return a Session.
    ///
    /// Args:
    ///     dir (str | None): Rootfs directory, default ./rootfs or $FREEROOT_DIR
    ///     release (str | None): Ubuntu base point release, e.g. "22.04.3"
    #[pyfn(m)]
    #[pyo3(signature = (dir=None, release=None))]
    fn setup(py: Python, dir: Option<PathBuf>, release: Option<String>) -> PyResult<Session> {
        let mut config = Config::from_env();
        if let Some(dir) = dir {
            config.rootfs_dir = dir;
        }
        if let Some(point) = release {
            config.release = point.split('.').take(2).collect::<Vec<_>>().join(".");
            config.point_release = point;
        }

        let inner = py
            .allow_threads(|| freeroot::Session::setup(config))
            .map_err(error::into_pyerr)?;
        Ok(Session { inner })
    }

    m.add_class::<Session>()?;
    Ok(())
}
