//! WASM bindings for the stache compiler.
//!
//! Exposes `render()` to JavaScript via wasm-bindgen.
//! Returns a JS object `{ output }` or throws on error.

use serde_json::Value;
use stache_compiler::MapLoader;
use stache_render::HtmlEscaper;
use wasm_bindgen::prelude::*;

/// Render a template against loosely typed data, HTML-escaping values.
///
/// `partials` is an optional object mapping partial names to template text.
fn render_native(template: &str, data: Value, partials: Option<Value>) -> Result<String, String> {
    let mut loader = MapLoader::new();
    if let Some(Value::Object(entries)) = partials {
        for (name, text) in entries {
            match text {
                Value::String(text) => loader.insert(&name, &text),
                _ => return Err(format!("partial '{name}' must be a string")),
            }
        }
    }
    stache_render::render(
        &stache_compiler::NamedTemplate::inline("template", template),
        &stache_compiler::Schema::dynamic(),
        &loader,
        &stache_render::Renderer::new().with_escaper(HtmlEscaper),
        &stache_render::RenderInput::new(data),
    )
    .map_err(|e| e.to_string())
}

/// Render a template.
///
/// Returns a JS object with `{ output: string }`.
/// Throws a JS error if compiling or rendering fails.
#[wasm_bindgen]
pub fn render(template: &str, data: JsValue, partials: JsValue) -> Result<JsValue, JsError> {
    let data: Value = if data.is_undefined() || data.is_null() {
        Value::Object(Default::default())
    } else {
        serde_wasm_bindgen::from_value(data).map_err(|e| JsError::new(&e.to_string()))?
    };
    let partials: Option<Value> = if partials.is_undefined() || partials.is_null() {
        None
    } else {
        Some(serde_wasm_bindgen::from_value(partials).map_err(|e| JsError::new(&e.to_string()))?)
    };

    let output = render_native(template, data, partials).map_err(|e| JsError::new(&e))?;

    let js_obj = js_sys::Object::new();
    js_sys::Reflect::set(&js_obj, &"output".into(), &output.into())
        .map_err(|_| JsError::new("Failed to set output property"))?;

    Ok(js_obj.into())
}

/// Get the compiler version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    // =========================================================================
    // Native tests (non-WASM): verify the render pipeline works
    // =========================================================================

    fn native(template: &str, data: Value) -> String {
        render_native(template, data, None).unwrap()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(native("", json!({})), "");
        assert_eq!(native("hello\n", json!({})), "hello\n");
    }

    #[test]
    fn test_values_are_html_escaped() {
        let data = json!({"name": "<Ada & Co>"});
        assert_eq!(native("{{name}}", data.clone()), "&lt;Ada &amp; Co&gt;");
        assert_eq!(native("{{{name}}}", data), "<Ada & Co>");
    }

    #[test]
    fn test_list_example() {
        let out = native(
            "<ul>\n{{#items}}\n  <li>{{name}}</li>\n{{/items}}\n</ul>\n",
            json!({"items": [{"name": "a"}, {"name": "b"}]}),
        );
        assert_eq!(out, "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>\n");
    }

    #[test]
    fn test_partials_object() {
        let out = render_native(
            "{{<layout}}{{$body}}hi {{who}}{{/body}}{{/layout}}",
            json!({"who": "there"}),
            Some(json!({"layout": "[{{$body}}{{/body}}]"})),
        )
        .unwrap();
        assert_eq!(out, "[hi there]");
    }

    #[test]
    fn test_non_string_partial_rejected() {
        let err = render_native("x", json!({}), Some(json!({"p": 1}))).unwrap_err();
        assert_eq!(err, "partial 'p' must be a string");
    }

    #[test]
    fn test_errors_are_messages() {
        let err = render_native("{{#open}}", json!({}), None).unwrap_err();
        assert!(err.contains("Unclosed open block"), "{err}");
        let err = render_native("{{>missing}}", json!({}), None).unwrap_err();
        assert!(err.contains("cannot load 'missing'"), "{err}");
    }

    #[test]
    fn test_version() {
        let v = version();
        assert!(!v.is_empty());
        assert!(v.contains('.'));
    }

    #[test]
    fn test_multiple_renders() {
        // no state shared between calls
        let first = native("{{x}}", json!({"x": 1}));
        let second = native("{{x}}", json!({"y": 2}));
        assert_eq!(first, "1");
        assert_eq!(second, "");
    }
}
