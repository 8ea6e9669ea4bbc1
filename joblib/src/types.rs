use uuid::Uuid;

pub type Program = String;
pub type Args = Vec<String>;
pub type Dir = String;
pub type Envs = Vec<(String, String)>;
pub type JobId = Uuid;
pub type OutputBlob = bytes::Bytes;

/// Everything needed to spawn a job's child process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobSpec {
    pub program: Program,
    pub args: Args,
    pub dir: Dir,
    pub envs: Envs,
}

impl JobSpec {
    pub fn new(program: impl Into<Program>) -> Self {
        Self {
            program: program.into(),
            dir: ".".into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn dir(mut self, dir: impl Into<Dir>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn env(mut self, var: impl Into<String>, val: impl Into<String>) -> Self {
        self.envs.push((var.into(), val.into()));
        self
    }
}
