//! Interactive prompts for connection parameters missing from the flags.

use dialoguer::{Input, Password};

use crate::Cli;

/// Result type for wizard operations.
pub type WizardResult<T> = Result<T, WizardError>;

/// Errors that can occur while prompting.
#[derive(Debug)]
pub enum WizardError {
    /// IO error (terminal interaction).
    Io(std::io::Error),
}

impl std::fmt::Display for WizardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for WizardError {}

impl From<dialoguer::Error> for WizardError {
    fn from(e: dialoguer::Error) -> Self {
        Self::Io(std::io::Error::other(e.to_string()))
    }
}

/// Connection parameters after prompting for whatever the flags left out.
pub struct Answers {
    pub source_host: String,
    pub source_db: String,
    pub target_host: String,
    pub target_db: String,
    pub user: String,
    pub password: String,
    pub table_filter: String,
}

/// Fill in required parameters, prompting only for the missing ones, then
/// echo the equivalent non-interactive command line.
pub fn fill_missing(cli: &Cli) -> WizardResult<Answers> {
    let answers = Answers {
        source_host: prompt_if_missing(&cli.source_host, "Source host")?,
        source_db: prompt_if_missing(&cli.source_db, "Source database")?,
        target_host: prompt_if_missing(&cli.target_host, "Target host")?,
        target_db: prompt_if_missing(&cli.target_db, "Target database")?,
        user: prompt_if_missing(&cli.user, "Username")?,
        password: match &cli.password {
            Some(password) => password.clone(),
            None => Password::new().with_prompt("Password").interact()?,
        },
        table_filter: prompt_if_missing(&cli.table_filter, "Table filter (wildcard: %)")?,
    };

    println!(
        "{}",
        command_line(&answers, &cli.schema, cli.parallel)
    );
    Ok(answers)
}

/// The flag set equivalent to the answered prompts, so the next run can skip
/// the wizard. The password is left out on purpose.
fn command_line(answers: &Answers, schema: &str, parallel: usize) -> String {
    format!(
        "COMMAND: mssqlcopy --source-host {} --source-db {} --target-host {} \
         --target-db {} --user {} --schema {} --table-filter \"{}\" --parallel {}",
        answers.source_host,
        answers.source_db,
        answers.target_host,
        answers.target_db,
        answers.user,
        schema,
        answers.table_filter,
        parallel,
    )
}

fn prompt_if_missing(value: &Option<String>, prompt: &str) -> WizardResult<String> {
    match value {
        Some(value) => Ok(value.clone()),
        None => Ok(Input::new().with_prompt(prompt).interact_text()?),
    }
}
