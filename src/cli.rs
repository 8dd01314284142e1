use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "epp-relay")]
#[command(author, version, about = "Man-in-the-middle relay for EPP sessions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志详细程度（-v debug，-vv trace；设置 RUST_LOG 时以其为准）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行中继
    Run {
        /// 配置文件路径
        #[arg(short, long, default_value = "relay.toml")]
        config: String,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long, default_value = "relay.toml")]
        config: String,
    },
    /// 输出配置模板
    Template {
        /// 输出文件路径（默认输出到标准输出）
        #[arg(short, long)]
        output: Option<String>,
    },
    /// 生成自签名证书（用于客户端侧 TLS 或测试）
    Cert {
        /// 证书输出路径
        #[arg(long, value_name = "PATH", default_value = "cert.pem")]
        cert_out: String,

        /// 私钥输出路径
        #[arg(long, value_name = "PATH", default_value = "key.pem")]
        key_out: String,

        /// 证书的 Common Name
        #[arg(long, default_value = "localhost")]
        common_name: String,

        /// 证书的 SubjectAltName（用逗号分隔多个）
        #[arg(long, value_delimiter = ',', value_name = "DNS,...")]
        alt_names: Vec<String>,
    },
}
