mod api;
mod app;
mod config;
mod list;
mod logging;
mod models;
mod optimistic;
mod pages;
mod resources;
mod runtime;
mod state;
mod storage;
mod timing;
mod url_state;
mod util;

use crate::app::App;
use crate::config::EnvConfig;
use crate::logging::init_logging;
use leptos::prelude::*;

// Needed for `#[wasm_bindgen(start)]` on the wasm entrypoint.
#[cfg(all(target_arch = "wasm32", not(test)))]
use wasm_bindgen::prelude::wasm_bindgen;

// Only register the WASM start function for normal builds (not for tests),
// otherwise wasm-bindgen-test will end up with multiple entry symbols.
#[cfg_attr(all(target_arch = "wasm32", not(test)), wasm_bindgen(start))]
pub fn main() {
    console_error_panic_hook::set_once();

    let config = EnvConfig::new();
    init_logging(&config);
    tracing::info!(event = "app.start", api_url = %config.api_url);

    mount_to_body(move || view! { <App config=config.clone() /> });
}
