//! The view-engine collaborator contract.
//!
//! The pipeline does not implement templating. It only knows that a view
//! engine is a function taking a template identifier, a string data map, and
//! the response handle to write through — applications plug in whatever
//! renderer they like via [`App::view_engine`](crate::App::view_engine).
//!
//! [`template_engine`] is the bundled placeholder implementation: it reads a
//! template file and substitutes `{{key}}` markers from the data map. Enough
//! for status pages and demos; real applications will bring a real renderer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::http::{ResponseContext, Status, StatusCode};

/// Data passed to a view rendering: template placeholder names to values.
pub type ViewData = HashMap<String, String>;

/// The view-engine contract: `(template identifier, data, response handle)`.
///
/// Invoked by [`ResponseContext::render`]; expected to write the rendered
/// output through the response handle.
pub type ViewEngine = Arc<dyn Fn(&str, &ViewData, &ResponseContext) + Send + Sync + 'static>;

/// The bundled `{{key}}`-substitution file engine.
///
/// Resolves template identifiers as file names under `dir`, replaces every
/// `{{key}}` occurrence with the corresponding data value, and completes the
/// response with the result. A template that cannot be read turns the
/// response into a `500`.
pub fn template_engine(dir: impl Into<PathBuf>) -> ViewEngine {
    let dir = dir.into();
    Arc::new(move |template, data, response| {
        match std::fs::read_to_string(dir.join(template)) {
            Ok(mut rendered) => {
                for (key, value) in data {
                    rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
                }
                response.send(rendered);
                response.end();
            }
            Err(e) => {
                response.set_status(Status::detailed(
                    StatusCode::InternalServerError,
                    format!("template {template}: {e}"),
                ));
            }
        }
    })
}
