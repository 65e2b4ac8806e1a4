use crate::{decode, BufferLayout, InstrumentConfig, InstrumentError, Instrumenter, Module};
use pyo3::{exceptions::PyValueError, prelude::*};
use std::fmt::Display;
use std::time::Instant;

/// `(invocation, ordinal, tag, payload, value_ordinal)`
type PyRecord = (u32, u32, u8, Vec<u32>, Option<u32>);

fn value_error<E: Display>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn instrument_json(
    module_json: &str,
    config_json: &str,
) -> Result<(String, String), InstrumentError> {
    let start = Instant::now();
    let module = Module::from_json(module_json)?;
    let config = InstrumentConfig::from_json(config_json)?;
    let out = Instrumenter::new(&module, config)?.run()?;
    let report = out.report_json()?;
    tracing::debug!(
        functions = out.plans.len(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "instrumented module"
    );
    Ok((out.schema_text(), report))
}

#[pymodule]
pub fn shadertrace(_py: Python, m: &PyModule) -> PyResult<()> {
    /// Plans instrumentation for every entry function of a module. Returns
    /// the schema text and a JSON report.
    #[pyfn(m)]
    fn instrument(py: Python, module_json: &str, config_json: &str) -> PyResult<(String, String)> {
        py.allow_threads(|| instrument_json(module_json, config_json))
            .map_err(value_error)
    }

    /// Decodes a buffer snapshot into `(selected, unselected)` record lists.
    #[pyfn(m)]
    fn decode_trace(
        words: Vec<u32>,
        buffer_size: u32,
    ) -> PyResult<(Vec<PyRecord>, Vec<PyRecord>)> {
        let layout = BufferLayout::new(buffer_size).map_err(value_error)?;
        let trace = decode(&words, layout).map_err(value_error)?;
        let flat = |half: &crate::HalfTrace| -> Vec<PyRecord> {
            half.records
                .iter()
                .map(|r| {
                    (
                        r.invocation,
                        r.ordinal,
                        r.ty.tag(),
                        r.payload.to_vec(),
                        r.value_ordinal,
                    )
                })
                .collect()
        };
        Ok((flat(&trace.selected), flat(&trace.unselected)))
    }

    Ok(())
}
