//! Render a precompiled template against JSON data.
//!
//! Usage: `render <template.json> [data.json] [--mode append|serialize|rehydrate]
//! [--markup FILE] [--partial NAME=FILE]... [--stats]`

use clap::Parser;
use reflow::dom::html::serialize_children;
use reflow::{Document, DomOperations, Environment, RenderMode, RenderOptions, Template, Value};
use std::fs;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

#[derive(Parser, Debug)]
#[command(name = "render")]
#[command(about = "Render a precompiled template to HTML")]
struct Args {
    /// Wire-format template (JSON envelope)
    template: PathBuf,

    /// Self data for the template (JSON); an empty object when omitted
    data: Option<PathBuf>,

    /// Builder strategy: append, serialize or rehydrate
    #[arg(long, default_value = "append")]
    mode: RenderMode,

    /// Server-rendered markup to rehydrate
    #[arg(long)]
    markup: Option<PathBuf>,

    /// Register a partial, as NAME=FILE
    #[arg(long = "partial", value_parser = parse_partial)]
    partials: Vec<(String, PathBuf)>,

    /// Print compilation statistics to stderr
    #[arg(long)]
    stats: bool,
}

fn parse_partial(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected NAME=FILE, got `{arg}`")),
    }
}

fn load_template(path: &PathBuf) -> Result<Rc<Template>, String> {
    let source = fs::read_to_string(path)
        .map_err(|error| format!("Failed to read {}: {}", path.display(), error))?;
    Template::from_json(&source).map_err(|error| format!("{}: {}", path.display(), error))
}

fn run(args: Args) -> Result<String, String> {
    let template = load_template(&args.template)?;
    let data: serde_json::Value = match &args.data {
        Some(path) => {
            let source = fs::read_to_string(path)
                .map_err(|error| format!("Failed to read {}: {}", path.display(), error))?;
            serde_json::from_str(&source)
                .map_err(|error| format!("{}: {}", path.display(), error))?
        }
        None => serde_json::json!({}),
    };

    let document = Rc::new(Document::new());
    let env = Environment::with_dom(document.clone());
    for (name, path) in &args.partials {
        env.register_partial(name, load_template(path)?);
    }

    let body = match &args.markup {
        Some(path) => {
            let markup = fs::read_to_string(path)
                .map_err(|error| format!("Failed to read {}: {}", path.display(), error))?;
            document.element_with_html("body", &markup)
        }
        None if args.mode == RenderMode::Rehydrate => {
            return Err("--mode rehydrate needs --markup".to_string());
        }
        None => document.create_element("body", None),
    };

    let self_value = Value::from_json(env.clock(), &data);
    let options = RenderOptions::new(self_value, body.clone()).mode(args.mode);
    let result = template
        .render(&env, options)
        .and_then(|iterator| iterator.sync())
        .map_err(|error| format!("Render error: {}", error))?;
    log::info!(
        "rendered {} with {} DOM mutations",
        template.id(),
        document.mutation_count()
    );

    if args.stats {
        eprint!("{}", env.stats());
    }
    let html = serialize_children(&body);
    result.destroy();
    Ok(html)
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    match run(args) {
        Ok(html) => println!("{html}"),
        Err(error) => {
            log::error!("{error}");
            eprintln!("{error}");
            process::exit(1);
        }
    }
}
