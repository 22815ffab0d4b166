use std::process;
use std::sync::Arc;

use openapi_cmdtree::{
    builtin_plugins, ApiCommand, BuildContext, CliConfig, CliError, DefinitionSource,
    DirectorySource, HttpClient, HttpSource, Invocation, TOOLS_GROUP,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match run() {
        Ok(()) => {}
        Err(CliError::Usage(e)) => e.exit(),
        Err(e) => {
            eprintln!("Error: {}", error_chain(&e));
            process::exit(1);
        }
    }
}

fn run() -> Result<(), CliError> {
    let config = CliConfig::from_env();
    let client = HttpClient::new(&config)?;
    let source: Arc<dyn DefinitionSource> = match &config.definitions_dir {
        Some(dir) => Arc::new(DirectorySource::new(dir)),
        None => Arc::new(HttpSource::new(&config)?),
    };

    let mut ctx = BuildContext::new(config).with_source(source);
    add_builtin_commands(&mut ctx)?;
    ctx.load_services();
    ctx.apply_plugins(&builtin_plugins());

    let inv = ctx.finish().execute(&client, std::env::args_os())?;
    print_response(&inv)
}

fn add_builtin_commands(ctx: &mut BuildContext) -> Result<(), CliError> {
    let version = ApiCommand::custom("version", |inv| {
        inv.set_response(&Value::String(env!("CARGO_PKG_VERSION").to_string()));
        Ok(())
    })
    .short("Print the CLI version")
    .group(TOOLS_GROUP);
    ctx.add_command(&["version"], version)?;

    let utils = ApiCommand::namespace("utils")
        .short("Local utilities")
        .group(TOOLS_GROUP);
    ctx.add_command(&["utils"], utils)?;
    Ok(())
}

fn print_response(inv: &Invocation) -> Result<(), CliError> {
    match inv.response()? {
        Some(Value::String(s)) => println!("{s}"),
        Some(other) => {
            let pretty = serde_json::to_string_pretty(&other).map_err(CliError::Response)?;
            println!("{pretty}");
        }
        None => {}
    }
    Ok(())
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        out.push_str(&format!(": {s}"));
        source = s.source();
    }
    out
}
