use std::path::PathBuf;

use clap::Parser;
use log::info;
use siamese_eval::{IndexedDataset, Params, SiameseEval};

#[derive(Parser)]
#[command(name = "siamese-eval")]
#[command(
    about = "Score one-shot detection and segmentation results: greedy box matching, then mask IoU of the matched pairs"
)]
struct Cli {
    /// Path to ground truth annotations JSON file
    #[arg(long)]
    gt: PathBuf,

    /// Path to detection results JSON file
    #[arg(long)]
    dt: PathBuf,

    /// JSON params file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// IoU threshold for detection, assignment and the mask gate
    #[arg(long)]
    threshold: Option<f64>,

    /// Term added to every IoU denominator
    #[arg(long)]
    epsilon: Option<f64>,

    /// Filter to specific image IDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    img_ids: Option<Vec<u64>>,

    /// Filter to specific category IDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    cat_ids: Option<Vec<u64>>,

    /// Max predictions per image and category
    #[arg(long)]
    max_dets: Option<usize>,

    /// Score boxes only
    #[arg(long)]
    no_masks: bool,
}

impl Cli {
    fn params(&self) -> Result<Params, Box<dyn std::error::Error>> {
        let mut params = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text)?
            }
            None => Params::default(),
        };
        if let Some(thr) = self.threshold {
            params.iou_threshold = thr;
        }
        if let Some(eps) = self.epsilon {
            params.epsilon = eps;
        }
        if let Some(ref img_ids) = self.img_ids {
            params.img_ids = img_ids.clone();
        }
        if let Some(ref cat_ids) = self.cat_ids {
            params.cat_ids = cat_ids.clone();
        }
        if let Some(max_dets) = self.max_dets {
            params.max_dets = max_dets;
        }
        if self.no_masks {
            params.use_masks = false;
        }
        Ok(params)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let params = cli.params()?;

    info!("Loading ground truth from {:?}...", cli.gt);
    let gt = IndexedDataset::new(&cli.gt)?;

    info!("Loading detections from {:?}...", cli.dt);
    let dt = gt.load_res(&cli.dt)?;

    let mut eval = SiameseEval::new(gt, dt, params);

    info!("Evaluating...");
    eval.evaluate()?;

    info!("Accumulating...");
    eval.accumulate();

    eval.summarize();

    // Machine-readable stats line
    if let Some(ref stats) = eval.stats {
        let stats_strs: Vec<String> = stats.iter().map(|v| format!("{:.15}", v)).collect();
        println!("stats: [{}]", stats_strs.join(", "));
    }

    Ok(())
}
