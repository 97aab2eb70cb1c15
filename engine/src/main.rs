//! Shard Engine - Command Line Interface
//!
//! Runs the sharded inference engine against the local reference backend.
//!
//! ## Commands
//!
//! - `init-config` - Write a default engine configuration file
//! - `scaffold` - Create a reference model artifact under the models directory
//! - `infer` - Run a prompt (optionally with an image) and generate tokens
//! - `infer-tensor` - Run a JSON tensor through a shard

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ndarray::{ArrayD, IxDyn};
use shard_engine::reference::ByteTokenizer;
use shard_engine::{
    init_production_logging, init_simple_logging, EngineConfig, InferenceEngine,
    InferenceOutput, LocalShardResolver, PromptInput, ReferenceLoader, ReferenceModelConfig,
    Shard,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shard Engine - stateful inference over one shard of a layered model
#[derive(Parser, Debug)]
#[command(name = "shard-engine")]
#[command(about = "Stateful sharded inference engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration file (default: ~/.shard-engine/engine.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default engine configuration file
    InitConfig {
        /// Directory holding model artifacts
        #[arg(short, long)]
        models_dir: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Create a reference model artifact
    Scaffold {
        /// Model ID (directory name under the models directory)
        #[arg(short, long)]
        model_id: String,

        /// Hidden dimension
        #[arg(long, default_value = "64")]
        hidden_dim: usize,

        /// Vocabulary size
        #[arg(long, default_value = "512")]
        vocab_size: usize,

        /// Number of layers
        #[arg(short, long, default_value = "8")]
        num_layers: u32,

        /// Weight seed
        #[arg(short, long, default_value = "12345")]
        seed: u64,
    },

    /// Run a prompt through a shard and generate tokens
    Infer {
        #[command(flatten)]
        shard: ShardArgs,

        /// Prompt text
        #[arg(short, long)]
        prompt: String,

        /// Image as a data URI or a path to a png/jpeg/gif/webp file
        #[arg(short, long)]
        image: Option<String>,

        /// Maximum tokens to generate (last-layer shards only)
        #[arg(short = 'n', long, default_value = "16")]
        steps: usize,

        /// Request ID (random if omitted)
        #[arg(short, long)]
        request_id: Option<String>,
    },

    /// Run a JSON nested-array tensor through a shard
    InferTensor {
        #[command(flatten)]
        shard: ShardArgs,

        /// Tensor as JSON, e.g. "[[1, 2, 3]]"
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File containing the tensor as JSON
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Request ID (random if omitted)
        #[arg(short, long)]
        request_id: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct ShardArgs {
    /// Model ID
    #[arg(short, long)]
    model_id: String,

    /// First layer of the shard
    #[arg(long, default_value = "0")]
    start: u32,

    /// End of the shard's layer range, exclusive (default: last layer)
    #[arg(long)]
    end: Option<u32>,

    /// Total layers of the model (default: read from the artifact)
    #[arg(long)]
    total: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => EngineConfig::default_path()?,
    };

    match cli.command {
        Commands::InitConfig { models_dir, force } => {
            init_simple_logging(cli.log_level.as_deref().unwrap_or("info"))?;
            cmd_init_config(&config_path, models_dir, force)?;
        }

        Commands::Scaffold {
            model_id,
            hidden_dim,
            vocab_size,
            num_layers,
            seed,
        } => {
            let config = EngineConfig::load_or_default(&config_path)?;
            init_simple_logging(cli.log_level.as_deref().unwrap_or(&config.log_level))?;
            let model = ReferenceModelConfig {
                hidden_dim,
                vocab_size,
                num_layers,
                seed,
                ..Default::default()
            };
            cmd_scaffold(&config, &model_id, &model)?;
        }

        Commands::Infer {
            shard,
            prompt,
            image,
            steps,
            request_id,
        } => {
            let config = EngineConfig::load_or_default(&config_path)?;
            init_logging(&config, cli.log_level.as_deref())?;
            cmd_infer(&config, shard, prompt, image, steps, request_id).await?;
        }

        Commands::InferTensor {
            shard,
            input,
            input_file,
            request_id,
        } => {
            let config = EngineConfig::load_or_default(&config_path)?;
            init_logging(&config, cli.log_level.as_deref())?;
            let json = match (input, input_file) {
                (Some(json), _) => json,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("Provide the tensor with --input or --input-file"),
            };
            cmd_infer_tensor(&config, shard, &json, request_id).await?;
        }
    }

    Ok(())
}

fn init_logging(config: &EngineConfig, level: Option<&str>) -> Result<()> {
    let level = level.unwrap_or(&config.log_level);
    match &config.log_dir {
        Some(dir) => init_production_logging(level, Some(dir.clone())),
        None => init_simple_logging(level),
    }
}

fn cmd_init_config(path: &Path, models_dir: Option<PathBuf>, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let mut config = EngineConfig::default();
    if let Some(models_dir) = models_dir {
        config.models_dir = models_dir;
    }
    config.save(path)?;

    println!("✓ Configuration saved to: {}", path.display());
    println!("   Models dir: {}", config.models_dir.display());
    println!("\nNext steps:");
    println!("  1. Create a model:  shard-engine scaffold --model-id demo");
    println!("  2. Run a prompt:    shard-engine infer --model-id demo --prompt \"Hello\"");
    Ok(())
}

fn cmd_scaffold(config: &EngineConfig, model_id: &str, model: &ReferenceModelConfig) -> Result<()> {
    let dir = LocalShardResolver::new(&config.models_dir).artifact_dir(model_id);
    model
        .write_artifact(&dir)
        .with_context(|| format!("Failed to write artifact for {}", model_id))?;

    println!("✓ Reference model written to: {}", dir.display());
    println!("   Layers: {}", model.num_layers);
    println!("   Hidden dim: {}", model.hidden_dim);
    println!("   Vocab size: {}", model.vocab_size);
    Ok(())
}

/// Build the shard from CLI arguments, filling in missing bounds from the artifact
fn shard_from_args(config: &EngineConfig, args: ShardArgs) -> Result<Shard> {
    let total = match args.total {
        Some(total) => total,
        None => {
            let dir = LocalShardResolver::new(&config.models_dir).artifact_dir(&args.model_id);
            ReferenceModelConfig::read_artifact(&dir)
                .with_context(|| format!("Failed to read model {}", args.model_id))?
                .num_layers
        }
    };
    let shard = Shard::new(args.model_id, args.start, args.end.unwrap_or(total), total);
    shard.validate()?;
    Ok(shard)
}

fn build_engine(config: &EngineConfig) -> Result<InferenceEngine> {
    let engine = InferenceEngine::with_config(
        Arc::new(LocalShardResolver::new(&config.models_dir)),
        Arc::new(ReferenceLoader::new()),
        config,
    )?;
    Ok(engine)
}

/// Accept a data URI as is, otherwise read the file and wrap it in one
fn image_data_uri(image: String) -> Result<String> {
    if image.starts_with("data:") {
        return Ok(image);
    }

    let path = PathBuf::from(&image);
    let mime_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => bail!("Unsupported image file {} (expected png, jpeg, gif or webp)", image),
    };
    let bytes =
        std::fs::read(&path).with_context(|| format!("Failed to read image {}", image))?;
    Ok(shard_engine::ImageInput::to_data_uri(mime_type, &bytes))
}

async fn cmd_infer(
    config: &EngineConfig,
    shard: ShardArgs,
    prompt: String,
    image: Option<String>,
    steps: usize,
    request_id: Option<String>,
) -> Result<()> {
    let shard = shard_from_args(config, shard)?;
    let image = image.map(image_data_uri).transpose()?;
    let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let engine = build_engine(config)?;

    info!(request_id = %request_id, shard = %shard, "Running prompt");
    let mut output = engine
        .infer_prompt(&request_id, &shard, PromptInput::from_parts(prompt, image), None)
        .await
        .context("Prompt inference failed")?;

    if !shard.is_last_layer() {
        if steps > 1 {
            warn!("Shard does not own the last layer, generating hidden states only");
        }
        print_output(&output);
        engine.release_request(&request_id, &shard).await?;
        engine.stats().print_summary();
        return Ok(());
    }

    let mut tokens = Vec::new();
    loop {
        let token = first_value(&output)?;
        if output.is_done || tokens.len() >= steps {
            break;
        }
        tokens.push(token as u32);
        if tokens.len() >= steps {
            break;
        }

        let next = ArrayD::from_shape_vec(IxDyn(&[1, 1]), vec![token])?;
        output = engine
            .infer_tensor(&request_id, &shard, next, None)
            .await
            .context("Generation step failed")?;
    }

    println!("\n{}", "Generation".bold().cyan());
    println!("{}", "==========".cyan());
    println!("  Request:  {}", request_id);
    println!("  Shard:    {}", shard);
    println!("  Tokens:   {:?}", tokens);
    println!("  Text:     {}", ByteTokenizer::decode(&tokens).green());
    if output.is_done {
        println!("  Stopped:  {}", "end of sequence".yellow());
    }
    println!();

    engine.release_request(&request_id, &shard).await?;
    engine.stats().print_summary();
    Ok(())
}

async fn cmd_infer_tensor(
    config: &EngineConfig,
    shard: ShardArgs,
    json: &str,
    request_id: Option<String>,
) -> Result<()> {
    let shard = shard_from_args(config, shard)?;
    let value: serde_json::Value = serde_json::from_str(json).context("Input is not valid JSON")?;
    let input = json_to_array(&value)?;
    let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let engine = build_engine(config)?;

    info!(request_id = %request_id, shard = %shard, shape = ?input.shape(), "Running tensor");
    let output = engine
        .infer_tensor(&request_id, &shard, input, None)
        .await
        .context("Tensor inference failed")?;

    print_output(&output);
    engine.stats().print_summary();
    Ok(())
}

fn first_value(output: &InferenceOutput) -> Result<f32> {
    output
        .output
        .iter()
        .next()
        .copied()
        .context("Shard produced an empty output")
}

fn print_output(output: &InferenceOutput) {
    let report = serde_json::json!({
        "shape": output.output.shape(),
        "data": output.output.iter().copied().collect::<Vec<f32>>(),
        "inference_state": output.inference_state,
        "is_done": output.is_done,
    });
    println!("{}", report);
}

/// Convert a nested JSON array of numbers into a dense array
///
/// The shape is taken from the first element at each depth; ragged input
/// is rejected.
fn json_to_array(value: &serde_json::Value) -> Result<ArrayD<f32>> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let serde_json::Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut data = Vec::with_capacity(shape.iter().product());
    flatten_json(value, &shape, 0, &mut data)?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), data)?)
}

fn flatten_json(
    value: &serde_json::Value,
    shape: &[usize],
    depth: usize,
    data: &mut Vec<f32>,
) -> Result<()> {
    match value {
        serde_json::Value::Number(n) if depth == shape.len() => {
            let n = n.as_f64().context("Number out of range")?;
            data.push(n as f32);
            Ok(())
        }
        serde_json::Value::Array(items) if depth < shape.len() => {
            if items.len() != shape[depth] {
                bail!(
                    "Ragged tensor: expected {} elements at depth {}, found {}",
                    shape[depth],
                    depth,
                    items.len()
                );
            }
            items
                .iter()
                .try_for_each(|item| flatten_json(item, shape, depth + 1, data))
        }
        other => bail!("Unexpected value at depth {}: {}", depth, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_array() {
        let value = serde_json::json!([[1, 2, 3]]);
        let array = json_to_array(&value).unwrap();
        assert_eq!(array.shape(), &[1, 3]);
        assert_eq!(array.iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);

        let scalar = json_to_array(&serde_json::json!(4.5)).unwrap();
        assert_eq!(scalar.ndim(), 0);
    }

    #[test]
    fn test_json_to_array_rejects_ragged() {
        assert!(json_to_array(&serde_json::json!([[1, 2], [3]])).is_err());
        assert!(json_to_array(&serde_json::json!([[1, "x"]])).is_err());
        assert!(json_to_array(&serde_json::json!([1, [2]])).is_err());
    }

    #[test]
    fn test_image_data_uri_passthrough() {
        let uri = "data:image/png;base64,AAEC".to_string();
        assert_eq!(image_data_uri(uri.clone()).unwrap(), uri);
        assert!(image_data_uri("picture.bmp".to_string()).is_err());
    }
}
