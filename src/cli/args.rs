use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "resource-layer",
    version,
    about = "资源管理层 - 缓存、连接池、批处理与内存监控",
    long_about = "resource-layer 提供带 TTL 的 LRU 缓存、连接池、优先级批处理器和内存压力监控，并通过统一的编排器组合使用。"
)]
pub struct Args {
    /// 配置文件路径（toml / yaml / json）
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 覆盖日志级别 (trace, debug, info, warn, error)
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 以 TOML 格式输出生效的配置
    Config,

    /// 采样当前进程并以 JSON 输出内存报告
    MemoryReport {
        /// 采样次数
        #[arg(long, default_value_t = 5)]
        samples: usize,

        /// 采样间隔（毫秒）
        #[arg(long = "interval-ms", default_value_t = 200)]
        interval_ms: u64,
    },

    /// 使用内置 echo 连接运行模拟负载，并以 JSON 输出聚合指标
    Simulate {
        /// 请求总数
        #[arg(short, long, default_value_t = 200)]
        requests: usize,

        /// 模拟的仓库数量
        #[arg(long, default_value_t = 4)]
        repositories: usize,

        /// 每个命令的模拟耗时（毫秒）
        #[arg(long = "latency-ms", default_value_t = 2)]
        latency_ms: u64,

        /// 每隔多少个请求发出一次写操作，0 表示只读
        #[arg(long = "mutation-every", default_value_t = 10)]
        mutation_every: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate_defaults() {
        let args = Args::try_parse_from(["resource-layer", "simulate"]).unwrap();
        assert_eq!(
            args.command,
            Command::Simulate {
                requests: 200,
                repositories: 4,
                latency_ms: 2,
                mutation_every: 10,
            }
        );
        assert!(args.config.is_none());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::try_parse_from([
            "resource-layer",
            "memory-report",
            "--samples",
            "3",
            "--config",
            "layer.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::MemoryReport {
                samples: 3,
                interval_ms: 200,
            }
        );
        assert_eq!(args.config, Some(PathBuf::from("layer.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["resource-layer"]).is_err());
    }
}
