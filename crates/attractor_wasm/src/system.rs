//! `wasm_bindgen` exports.

use crate::request::{IntegrationRequest, SystemDescription};
use js_sys::Array;
use serde::Serialize;
use wasm_bindgen::prelude::*;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|err| JsValue::from_str(&format!("Serialization error: {err}")))
}

fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

fn build_request(
    system: String,
    params: JsValue,
    initial: Vec<f64>,
    t_end: f64,
    sample_count: u32,
) -> Result<IntegrationRequest, JsValue> {
    let params = if params.is_undefined() || params.is_null() {
        Default::default()
    } else {
        serde_wasm_bindgen::from_value(params)
            .map_err(|err| JsValue::from_str(&format!("Invalid parameter map: {err}")))?
    };
    Ok(IntegrationRequest {
        system,
        params,
        initial,
        t_end,
        sample_count: sample_count as usize,
    })
}

/// Names of the registered systems.
#[wasm_bindgen(js_name = listSystems)]
pub fn list_systems() -> Array {
    attractor_core::list_systems()
        .into_iter()
        .map(JsValue::from_str)
        .collect()
}

/// Title, parameters (defaults and ranges), equations and defaults for one system.
#[wasm_bindgen(js_name = describeSystem)]
pub fn describe_system(name: &str) -> Result<JsValue, JsValue> {
    let description = SystemDescription::lookup(name).map_err(to_js_error)?;
    to_js(&description)
}

/// Integrates and returns `{ times, x, y, z }`.
#[wasm_bindgen]
pub fn integrate(
    system: String,
    params: JsValue,
    initial: Vec<f64>,
    t_end: f64,
    sample_count: u32,
) -> Result<JsValue, JsValue> {
    let request = build_request(system, params, initial, t_end, sample_count)?;
    let columns = request.columns().map_err(to_js_error)?;
    to_js(&columns)
}

/// Integrates and returns per-variable descriptive statistics.
#[wasm_bindgen]
pub fn summarize(
    system: String,
    params: JsValue,
    initial: Vec<f64>,
    t_end: f64,
    sample_count: u32,
) -> Result<JsValue, JsValue> {
    let request = build_request(system, params, initial, t_end, sample_count)?;
    let summary = request.summary().map_err(to_js_error)?;
    to_js(&summary)
}
