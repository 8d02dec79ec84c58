//! Stache Render
//!
//! Records the instructions `stache-compiler` emits into a [`Program`] and
//! runs it against JSON data.
//!
//! ```text
//! compile() → Program (InstructionSink) → Renderer::render(data) → String
//! ```

pub mod escape;
pub mod interpreter;
pub mod node;
pub mod program;

pub use escape::{Escaper, HtmlEscaper, NoEscape};
pub use interpreter::{LambdaFn, LambdaOutput, Lambdas, RenderError, RenderInput, Renderer};
pub use node::{ContextNode, NodeError, NodeSource};
pub use program::{Instruction, Program};

use serde_json::Value;
use stache_compiler::{
    CompileError, CompileOptions, NamedTemplate, Schema, ShapeProvider, TemplateLoader,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Compile and render in one step.
pub fn render(
    template: &NamedTemplate,
    shapes: &dyn ShapeProvider,
    loader: &dyn TemplateLoader,
    renderer: &Renderer,
    input: &RenderInput,
) -> Result<String, Error> {
    let program = Program::compile(template, shapes, loader, &CompileOptions::default())?;
    Ok(renderer.render(&program, input)?)
}

/// Render an inline template against loosely typed data.
pub fn render_str(
    source: &str,
    data: Value,
    loader: &dyn TemplateLoader,
) -> Result<String, Error> {
    render(
        &NamedTemplate::inline("template", source),
        &Schema::dynamic(),
        loader,
        &Renderer::new(),
        &RenderInput::new(data),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use stache_compiler::{LambdaShape, MapLoader, Shape, StructShape};

    fn dynamic(source: &str, data: Value) -> String {
        render_str(source, data, &MapLoader::new()).unwrap()
    }

    fn with_partials(source: &str, data: Value, partials: &[(&str, &str)]) -> String {
        let loader = partials
            .iter()
            .fold(MapLoader::new(), |loader, (name, text)| loader.with(name, text));
        render_str(source, data, &loader).unwrap()
    }

    fn page_schema() -> Schema {
        Schema::new(Shape::structure("Page"))
            .with_struct(
                "Page",
                StructShape::default()
                    .field("title", Shape::Text)
                    .field("xs", Shape::sequence(Shape::Bool))
                    .field("people", Shape::sequence(Shape::structure("Person")))
                    .field("scores", Shape::mapping(Shape::Number))
                    .field("note", Shape::optional(Shape::Text))
                    .field("status", Shape::Enum("Status".into()))
                    .lambda("bold", LambdaShape::raw())
                    .lambda(
                        "shout",
                        LambdaShape {
                            escaped: true,
                            ..LambdaShape::raw()
                        },
                    )
                    .lambda(
                        "card",
                        LambdaShape {
                            template: Some("<{{name}}>".into()),
                            ..LambdaShape::model(Shape::structure("Person"))
                        },
                    ),
            )
            .with_struct("Person", StructShape::default().field("name", Shape::Text))
            .with_enum("Status", &["ACTIVE", "RETIRED"])
    }

    fn page_data() -> Value {
        json!({
            "title": "Team",
            "xs": [true, true],
            "people": [{"name": "Ada"}, {"name": "Grace"}],
            "scores": {},
            "note": null,
            "status": "ACTIVE"
        })
    }

    fn typed(source: &str, renderer: &Renderer, data: Value) -> Result<String, Error> {
        render(
            &NamedTemplate::inline("page", source),
            &page_schema(),
            &MapLoader::new(),
            renderer,
            &RenderInput::new(data),
        )
    }

    // =========================================================================
    // Standalone lines
    // =========================================================================

    #[test]
    fn test_standalone_section_lines_removed() {
        let source = "A\n{{#xs}}\nB\n{{/xs}}\nC\n";
        assert_eq!(dynamic(source, json!({"xs": [true, true]})), "A\nB\nB\nC\n");
        assert_eq!(
            typed(source, &Renderer::new(), page_data()).unwrap(),
            "A\nB\nB\nC\n"
        );
    }

    #[test]
    fn test_comment_line_kept_inverted_line_removed() {
        let source = "{{! hidden }}\n{{^missing}}\nshown\n{{/missing}}\n";
        assert_eq!(dynamic(source, json!({})), "\nshown\n");
    }

    // =========================================================================
    // Sections
    // =========================================================================

    #[test]
    fn test_iteration_count_matches_length() {
        for n in [0usize, 1, 3] {
            let items: Vec<Value> = (0..n).map(|i| json!(i)).collect();
            let out = dynamic("{{#items}}x{{/items}}", json!({ "items": items }));
            assert_eq!(out, "x".repeat(n));
        }
        assert_eq!(dynamic("{{#items}}x{{/items}}", json!({})), "");
    }

    #[test]
    fn test_empty_mapping_truthy_empty_sequence_falsey() {
        assert_eq!(dynamic("{{#m}}in{{/m}}", json!({"m": {}})), "in");
        assert_eq!(dynamic("{{#m}}in{{/m}}", json!({"m": []})), "");
        assert_eq!(dynamic("{{^m}}out{{/m}}", json!({"m": {}})), "");
        assert_eq!(dynamic("{{^m}}out{{/m}}", json!({"m": []})), "out");

        let renderer = Renderer::new();
        assert_eq!(typed("{{#scores}}in{{/scores}}", &renderer, page_data()).unwrap(), "in");
    }

    #[test]
    fn test_loop_variables() {
        let out = dynamic(
            "{{#xs}}{{@index}}/{{-index}}{{#@first}}F{{/@first}}{{#@last}}L{{/@last}} {{/xs}}",
            json!({"xs": ["a", "b", "c"]}),
        );
        assert_eq!(out, "0/1F 1/2 2/3L ");
    }

    #[test]
    fn test_dynamic_lookup_reaches_outer_data() {
        let out = dynamic(
            "{{#items}}{{name}}:{{x}};{{/items}}",
            json!({"name": "outer", "items": [{"x": 1}, {"x": 2, "name": "inner"}]}),
        );
        assert_eq!(out, "outer:1;inner:2;");
    }

    #[test]
    fn test_typed_sections() {
        let renderer = Renderer::new();
        let out = typed(
            "{{#people}}{{name}}({{title}}) {{/people}}{{#note}}N{{/note}}{{^note}}-{{/note}}{{#status.ACTIVE}}!{{/status.ACTIVE}}",
            &renderer,
            page_data(),
        )
        .unwrap();
        assert_eq!(out, "Ada(Team) Grace(Team) -!");
    }

    // =========================================================================
    // Bindings and escaping
    // =========================================================================

    #[test]
    fn test_context_and_template_bindings() {
        let context = ContextNode::of(json!({"user": "sam"})).unwrap();
        let out = render(
            &NamedTemplate::inline("greeting", "{{@context.user}}@{{@template.name}}"),
            &Schema::dynamic(),
            &MapLoader::new(),
            &Renderer::new(),
            &RenderInput::new(json!({})).with_context(context),
        )
        .unwrap();
        assert_eq!(out, "sam@greeting");
    }

    #[test]
    fn test_html_escaping() {
        let renderer = Renderer::new().with_escaper(HtmlEscaper);
        let data = json!({"title": "<b>&</b>", "xs": [], "people": [], "scores": {}, "note": null, "status": "RETIRED"});
        let out = typed("{{title}}|{{{title}}}|{{&title}}", &renderer, data).unwrap();
        assert_eq!(out, "&lt;b&gt;&amp;&lt;/b&gt;|<b>&</b>|<b>&</b>");
    }

    // =========================================================================
    // Partials and parents
    // =========================================================================

    #[test]
    fn test_indented_partial() {
        let out = with_partials("  {{>p}}\n", json!({}), &[("p", "x\ny\n")]);
        assert_eq!(out, "  x\n  y\n");
    }

    #[test]
    fn test_partial_inherits_scope() {
        let out = with_partials(
            "{{#people}}{{>row}}{{/people}}",
            json!({"people": [{"name": "a"}, {"name": "b"}]}),
            &[("row", "[{{name}}]")],
        );
        assert_eq!(out, "[a][b]");
    }

    #[test]
    fn test_parent_block_override() {
        let partials = [("layout", "<h1>{{$title}}Default{{/title}}</h1>\n{{$body}}empty{{/body}}\n")];
        assert_eq!(
            with_partials("{{<layout}}{{$title}}{{name}}{{/title}}{{/layout}}", json!({"name": "Home"}), &partials),
            "<h1>Home</h1>\nempty\n"
        );
        assert_eq!(
            with_partials(
                "{{<layout}}\n{{$body}}\ncontent\n{{/body}}\n{{/layout}}\n",
                json!({}),
                &partials
            ),
            "<h1>Default</h1>\ncontent\n"
        );
    }

    // =========================================================================
    // Lambdas
    // =========================================================================

    #[test]
    fn test_raw_lambda() {
        let renderer = Renderer::new()
            .with_escaper(HtmlEscaper)
            .with_lambda("bold", |body, _| LambdaOutput::Raw(format!("<b>{body}</b>")))
            .with_lambda("shout", |body, _| LambdaOutput::Raw(body.to_uppercase()));
        let out = typed(
            "{{#bold}}{{title}}{{/bold}} {{#shout}}a<b{{/shout}}",
            &renderer,
            page_data(),
        )
        .unwrap();
        assert_eq!(out, "<b>{{title}}</b> A&lt;B");
    }

    #[test]
    fn test_model_lambda() {
        let renderer = Renderer::new().with_lambda("card", |body, current| {
            LambdaOutput::Model(json!({ "name": format!("{}-{}", body, current["title"].as_str().unwrap_or("")) }))
        });
        let out = typed("{{#card}}x{{/card}}", &renderer, page_data()).unwrap();
        assert_eq!(out, "<x-Team>");
    }

    #[test]
    fn test_standalone_lambda_indented_only_when_it_writes() {
        let loader = MapLoader::new().with("p", "{{#bold}}\nx\n{{/bold}}\nafter\n");
        let run = |renderer: &Renderer| {
            render(
                &NamedTemplate::inline("page", "  {{>p}}\n"),
                &page_schema(),
                &loader,
                renderer,
                &RenderInput::new(page_data()),
            )
            .unwrap()
        };

        let silent = Renderer::new().with_lambda("bold", |_, _| LambdaOutput::Raw(String::new()));
        assert_eq!(run(&silent), "  after\n");

        let loud = Renderer::new().with_lambda("bold", |body, _| LambdaOutput::Raw(format!("[{body}]")));
        assert_eq!(run(&loud), "  [x\n]  after\n");
    }

    #[test]
    fn test_partial_fragment() {
        let out = with_partials(
            "{{#people}}{{>list#person}}{{/people}}",
            json!({"people": [{"name": "Ada"}, {"name": "Grace"}]}),
            &[("list", "<ul>\n  {{#person}}\n  <li>{{name}}</li>\n  {{/person}}\n</ul>\n")],
        );
        assert_eq!(out, "<li>Ada</li>\n<li>Grace</li>\n");
    }

    #[test]
    fn test_unknown_lambda() {
        let err = typed("{{#bold}}x{{/bold}}", &Renderer::new(), page_data()).unwrap_err();
        assert_eq!(err, Error::Render(RenderError::UnknownLambda("bold".into())));
    }

    #[test]
    fn test_model_from_raw_lambda_rejected() {
        let renderer = Renderer::new().with_lambda("bold", |_, _| LambdaOutput::Model(json!({})));
        let err = typed("{{#bold}}x{{/bold}}", &renderer, page_data()).unwrap_err();
        assert_eq!(err, Error::Render(RenderError::UnexpectedModel("bold".into())));
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_compile_error_surfaces() {
        let err = typed("{{missing}}", &Renderer::new(), page_data()).unwrap_err();
        assert!(matches!(err, Error::Compile(CompileError::NotFound { .. })));
    }

    #[test]
    fn test_not_a_sequence() {
        let data = json!({"title": "t", "xs": "oops", "people": [], "scores": {}, "note": null, "status": "ACTIVE"});
        let err = typed("{{#xs}}x{{/xs}}", &Renderer::new(), data).unwrap_err();
        assert!(matches!(err, Error::Render(RenderError::NotASequence(_))));
    }
}
