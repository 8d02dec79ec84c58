use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Once;

use stache_compiler::{CompileOptions, DirLoader, NamedTemplate, Schema};
use stache_render::{ContextNode, HtmlEscaper, NoEscape, Program, RenderInput, Renderer};

#[derive(Parser)]
#[command(name = "stache")]
#[command(about = "stache, a Mustache-family template compiler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a template and report errors without rendering
    Check {
        #[command(flatten)]
        input: CompileArgs,
    },

    /// Render a template to stdout
    Render {
        #[command(flatten)]
        input: CompileArgs,

        /// JSON data the template is rendered against
        #[arg(long)]
        data: Option<PathBuf>,

        /// JSON value bound to @context
        #[arg(long)]
        context: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Escape::Html)]
        escape: Escape,
    },

    /// Print the compiled instruction listing
    Listing {
        #[command(flatten)]
        input: CompileArgs,
    },
}

#[derive(Args)]
struct CompileArgs {
    /// Template file
    path: PathBuf,

    /// JSON schema of the data (dynamic when omitted)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Directory partials and parents are loaded from (defaults to the template's directory)
    #[arg(long)]
    partials: Option<PathBuf>,

    /// JSON compile options
    #[arg(long)]
    options: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Escape {
    Html,
    #[value(name = "none")]
    Off,
}

static TRACING_INIT: Once = Once::new();

/// Enable with `RUST_LOG=stache_compiler=debug`. Logs go to stderr.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true),
                )
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Check { input } => cmd_check(&input),
        Command::Render {
            input,
            data,
            context,
            escape,
        } => cmd_render(&input, data.as_deref(), context.as_deref(), escape),
        Command::Listing { input } => cmd_listing(&input),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> T {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    match serde_json::from_str(&source) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Invalid JSON in {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

fn compile(input: &CompileArgs) -> Program {
    if !input.path.is_file() {
        eprintln!("Error: file not found: {}", input.path.display());
        std::process::exit(1);
    }

    let schema: Schema = input.schema.as_deref().map(read_json).unwrap_or_default();
    let options: CompileOptions = input.options.as_deref().map(read_json).unwrap_or_default();

    // Partials resolve relative to the template unless a directory is given
    let root = match &input.partials {
        Some(dir) => dir.clone(),
        None => input
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    let name = input
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.path.display().to_string());
    let template = NamedTemplate::file(&name, &input.path);

    match Program::compile(&template, &schema, &DirLoader::new(root), &options) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Compile error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_check(input: &CompileArgs) {
    compile(input);
    eprintln!("OK: {}", input.path.display());
}

fn cmd_listing(input: &CompileArgs) {
    print!("{}", compile(input));
}

fn cmd_render(input: &CompileArgs, data: Option<&Path>, context: Option<&Path>, escape: Escape) {
    let program = compile(input);

    let data = data
        .map(read_json)
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
    let mut render_input = RenderInput::new(data);
    if let Some(path) = context {
        match ContextNode::of(read_json::<serde_json::Value>(path)) {
            Ok(node) => render_input = render_input.with_context(node),
            Err(e) => {
                eprintln!("Context error: {e}");
                std::process::exit(1);
            }
        }
    }

    let renderer = match escape {
        Escape::Html => Renderer::new().with_escaper(HtmlEscaper),
        Escape::Off => Renderer::new().with_escaper(NoEscape),
    };
    match renderer.render(&program, &render_input) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Render error: {e}");
            std::process::exit(1);
        }
    }
}
