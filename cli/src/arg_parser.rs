use clap::{ArgEnum, Args, Parser, Subcommand};
use harness::config::TlsConfig;
use std::path::PathBuf;
use uuid::Uuid;

/// Run QA test cases against local and remote controller machines
#[derive(Debug, Parser)]
#[clap(name = "testbed")]
pub struct ArgParser {
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    /// run built-in test cases and print a summary
    Run {
        /// harness configuration file (JSON)
        #[clap(short, long, env = "TESTBED_CONFIG")]
        config: PathBuf,

        /// test case id to run; repeat to run several (default: all)
        #[clap(short, long = "testcase")]
        testcases: Vec<String>,

        /// write the run summary as JSON to this file
        #[clap(long)]
        report: Option<PathBuf>,
    },
    /// list the built-in test cases
    List,
    /// copy a trigger file to controllers and invoke a command on each
    Trigger {
        /// harness configuration file (JSON)
        #[clap(short, long, env = "TESTBED_CONFIG")]
        config: PathBuf,

        /// trigger file (JSON) to hand off
        #[clap(long)]
        file: PathBuf,

        /// where to place the trigger on each controller, relative to its root
        #[clap(long)]
        remote_path: String,

        /// shell command to run on each controller; it sees the path in TESTBED_TRIGGER
        #[clap(long)]
        command: String,

        /// controller machine name; repeat for several (default: every configured machine)
        #[clap(short, long = "machine")]
        machines: Vec<String>,
    },
    /// talk to an agent directly
    Job {
        /// The address of the agent
        #[clap(short = 's', long = "server", env = "TESTBED_AGENT")]
        server: String,

        #[clap(flatten)]
        tls: TlsArgs,

        #[clap(subcommand)]
        command: JobCommand,
    },
}

/// Client TLS material for reaching an agent that requires it
#[derive(Clone, Debug, Default, PartialEq, Eq, Args)]
pub struct TlsArgs {
    /// PEM CA certificate the agent's certificate is checked against
    #[clap(long, env = "TESTBED_AGENT_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// PEM client certificate presented to the agent
    #[clap(long, env = "TESTBED_AGENT_CERT")]
    pub cert: Option<PathBuf>,

    /// PEM private key for --cert
    #[clap(long, env = "TESTBED_AGENT_KEY")]
    pub key: Option<PathBuf>,

    /// name the agent's certificate must be issued for
    #[clap(long, default_value = "localhost")]
    pub domain: String,
}

impl TlsArgs {
    /// `None` when no TLS flag was given.
    pub fn config(&self) -> Result<Option<TlsConfig>, String> {
        match (&self.ca_cert, &self.cert, &self.key) {
            (None, None, None) => Ok(None),
            (Some(ca_cert), Some(cert), Some(key)) => Ok(Some(TlsConfig {
                ca_cert: ca_cert.clone(),
                cert: cert.clone(),
                key: key.clone(),
                domain: self.domain.clone(),
            })),
            _ => Err("--ca-cert, --cert and --key must be given together".to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Subcommand)]
pub enum JobCommand {
    /// start a new job
    Start {
        #[clap(long)]
        /// name of the command to run
        command: String,

        #[clap(long, multiple_values = true)]
        /// a list of args to the command
        args: Vec<String>,

        #[clap(long, default_value = "")]
        /// working directory for the command, relative to the agent root
        dir: String,

        #[clap(long, multiple_values = true, parse(try_from_str = var_eq_val))]
        /// list of environment variables
        envs: Vec<(String, String)>,
    },
    /// stop a job
    Stop {
        /// Uuid v4 string
        job_id: Uuid,
    },
    /// get a job's status
    Status {
        /// Uuid v4 string
        job_id: Uuid,
    },
    /// stream a job's output
    Output {
        /// type of output to stream
        #[clap(arg_enum)]
        output_type: OutputType,

        /// Uuid v4 string
        job_id: Uuid,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ArgEnum)]
pub enum OutputType {
    /// stream stdout
    Stdout,
    /// stream stderr
    Stderr,
    /// stream stdout and stderr
    All,
}

/// try_from_str parse function for command env variables
fn var_eq_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((var, val)) if !var.is_empty() => Ok((var.to_string(), val.to_string())),
        _ => Err("Required format is VAR=VAL".to_string()),
    }
}
