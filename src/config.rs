use crate::mask_generator::GeneratorSettings;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Prefix the routes are additionally served under (empty to disable)
    #[arg(long, default_value = "/api", value_parser = check_root_path)]
    pub root_path: String,

    #[arg(long, default_value = "models/mobile_sam_encoder.onnx")]
    pub encoder_path: PathBuf,

    #[arg(long, default_value = "models/mobile_sam_decoder.onnx")]
    pub decoder_path: PathBuf,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Skip accelerator detection and run on CPU
    #[arg(long = "cpu")]
    pub force_cpu: bool,

    #[arg(short, long, default_value_t = default_num_threads())]
    pub num_threads: usize,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_concurrent_inferences: u32,

    #[arg(long, default_value_t = 20)]
    pub max_upload_mb: usize,

    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(u32).range(1..=128))]
    pub points_per_side: u32,

    #[arg(long, default_value_t = 0.88, value_parser = check_unit_interval)]
    pub pred_iou_thresh: f32,

    #[arg(long, default_value_t = 0.95, value_parser = check_unit_interval)]
    pub stability_score_thresh: f32,

    #[arg(long, default_value_t = 1.0)]
    pub stability_score_offset: f32,

    #[arg(long, default_value_t = 0.7, value_parser = check_unit_interval)]
    pub box_nms_thresh: f32,

    /// tracing filter directive, overridden by RUST_LOG
    #[arg(long, default_value = "mobilesam_rs=debug,tower_http=info")]
    pub log_filter: String,
}

/// Every option at its default value, ignoring the process arguments.
impl Default for Config {
    fn default() -> Self {
        Self::parse_from([env!("CARGO_PKG_NAME")])
    }
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            points_per_side: self.points_per_side,
            pred_iou_thresh: self.pred_iou_thresh,
            stability_score_thresh: self.stability_score_thresh,
            stability_score_offset: self.stability_score_offset,
            box_nms_thresh: self.box_nms_thresh,
            ..GeneratorSettings::default()
        }
    }

    pub fn bind_address(&self) -> anyhow::Result<SocketAddr> {
        let address = format!("{}:{}", self.host, self.port);
        address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", address, e))
    }

    pub const fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

fn default_num_threads() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

fn check_unit_interval(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("{} is not a number", s))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} must be between 0 and 1", s))
    }
}

fn check_root_path(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Ok(String::new());
    }
    if !s.starts_with('/') || s.len() > 1 && s.ends_with('/') {
        return Err(format!(
            "{} must start with `/` and must not end with `/`",
            s
        ));
    }
    if s == "/" {
        return Ok(String::new());
    }
    Ok(s.to_string())
}
