//! Gateway Check - Verifies the model credentials and both model endpoints
//!
//! Usage:
//!   cargo run --bin check-gateway [--image <path>]
//!
//! Sends a text-only prompt to the text model, then an image (a generated red
//! square unless --image is given) to the vision model, and prints both replies.

use anyhow::{Context, Result};
use chart_insights_analysis::{
    ChartImage, GatewayConfig, GeminiGateway, ModelGateway, ResponseFormat,
};
use clap::Parser;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "check-gateway")]
#[command(about = "Check connectivity to the hosted model used for chart analysis")]
struct Args {
    /// Image file to send to the vision model instead of a generated square
    #[arg(long, short)]
    image: Option<PathBuf>,

    /// Question to ask about the image
    #[arg(long, default_value = "What color is this image?")]
    question: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = GatewayConfig::from_env()?;
    let gateway = GeminiGateway::new(config.clone())?;

    info!("Testing text model {}...", config.text_model);
    let text = gateway
        .complete(
            "Hello, can you respond with 'API connection successful'?",
            ResponseFormat::Text,
        )
        .await
        .map_err(|e| {
            error!("Text model check failed: {:#}", e);
            e
        })?;
    info!("✓ Text model response: {}", text.trim());

    let bytes = match &args.image {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => red_square()?,
    };
    let image = ChartImage::decode(bytes)?;

    info!("Testing vision model {}...", config.vision_model);
    let reply = gateway
        .describe_image(&args.question, &image, ResponseFormat::Text)
        .await
        .map_err(|e| {
            error!("Vision model check failed: {:#}", e);
            e
        })?;
    info!("✓ Vision model response: {}", reply.trim());

    info!("All gateway checks passed");
    Ok(())
}

fn red_square() -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(100, 100, Rgb([255, 0, 0]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .context("Failed to encode test image")?;
    Ok(out.into_inner())
}
