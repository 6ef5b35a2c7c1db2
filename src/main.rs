//! Locution CLI
//!
//! Minimal driver: load a GGUF model, send one prompt, stream the reply to
//! stdout. Mostly a development harness for the library.

use std::io::Write;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use locution::{
    GenerationRequest, Instance, InstanceOptions, InstanceSettings, ModelProfile, Turn,
};

fn usage() -> ! {
    eprintln!("Usage: locution <model.gguf> <prompt> [system-prompt]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("locution=info".parse().unwrap()))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(model_path) = args.next() else { usage() };
    let Some(prompt) = args.next() else { usage() };
    let system_prompt = args.next();

    let profile = ModelProfile::detect(&model_path);
    info!(
        "Loading {} (architecture: {:?})",
        profile.id, profile.architecture
    );

    let instance = Instance::local(
        profile,
        InstanceSettings::default(),
        InstanceOptions::default(),
    );

    let mut progress = instance.load();
    while let Some(stage) = progress.next().await {
        match stage {
            locution::LoadStage::Ready => info!("Model ready"),
            locution::LoadStage::Failed(e) => {
                eprintln!("Load failed: {e}");
                std::process::exit(1);
            }
            other => info!("{:?}", other),
        }
    }

    let mut request = GenerationRequest::new(vec![Turn::user(prompt)]);
    if let Some(system) = system_prompt {
        request = request.with_system_prompt(system);
    }

    let mut stream = instance.generate(request);
    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        if let Some(reason) = event.reason {
            println!();
            info!("Completed: {:?}", reason);
            break;
        }
        print!("{}", event.text);
        let _ = stdout.flush();
    }

    instance.shutdown();
}
