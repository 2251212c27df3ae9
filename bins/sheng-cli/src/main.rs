//! sheng - 编解码命令行工具
//!
//! 把原始 PCM 编码为数据包流文件, 或反向解码, 也可以在内存中做往返测试并报告信噪比.

mod commands;
mod pcm;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use sheng::logging::{self, LoggingConfig};

use commands::EncodeOptions;
use pcm::PcmFormat;

#[derive(Parser, Debug)]
#[command(name = "sheng", version, about = "纯 Rust 低延迟音频编解码工具")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 日志目录
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 编码原始 PCM 为数据包流
    Encode {
        /// 输入 PCM 文件
        #[arg(short, long)]
        input: PathBuf,
        /// 输出数据包流文件
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        options: EncodeOptions,
        /// 每 N 个数据包丢弃一个
        #[arg(long)]
        loss: Option<usize>,
    },
    /// 解码数据包流为原始 PCM
    Decode {
        /// 输入数据包流文件
        #[arg(short, long)]
        input: PathBuf,
        /// 输出 PCM 文件
        #[arg(short, long)]
        output: PathBuf,
        /// 输出采样率 (Hz)
        #[arg(long, default_value_t = 48000)]
        rate: u32,
        /// 输出 PCM 格式
        #[arg(long, value_enum, default_value = "s16le")]
        format: PcmFormat,
    },
    /// 在内存中编码再解码, 报告码率、模式分布与信噪比
    Roundtrip {
        /// 输入 PCM 文件
        #[arg(short, long)]
        input: PathBuf,
        #[command(flatten)]
        options: EncodeOptions,
        /// 每 N 个数据包丢弃一个
        #[arg(long)]
        loss: Option<usize>,
    },
    /// 列出数据包流中每个包的 TOC 信息
    Inspect {
        /// 输入数据包流文件
        #[arg(short, long)]
        input: PathBuf,
        /// 按行输出 JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut log_config = LoggingConfig::for_cli("sheng-cli", cli.verbose);
    if let Some(dir) = &cli.log_dir {
        log_config.directory = dir.clone();
    }
    if let Err(e) = logging::init(log_config) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    let result = match &cli.command {
        Command::Encode {
            input,
            output,
            options,
            loss,
        } => commands::encode(input, output, options, *loss),
        Command::Decode {
            input,
            output,
            rate,
            format,
        } => commands::decode(input, output, *rate, *format),
        Command::Roundtrip {
            input,
            options,
            loss,
        } => commands::roundtrip(input, options, *loss),
        Command::Inspect { input, json } => commands::inspect(input, *json),
    };

    if let Err(e) = result {
        tracing::error!("{e:#}");
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}
