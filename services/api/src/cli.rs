use crate::demo::{run_demo, DemoArgs};
use crate::infra::{add_reviewer, list_reviewers, ReviewerAddArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use mortgage_router::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Mortgage Application Router",
    about = "Serve the broker and reviewer portal, manage reviewers, or simulate assignment",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Manage reviewer (admin) accounts
    Reviewer {
        #[command(subcommand)]
        command: ReviewerCommand,
    },
    /// Simulate round-robin assignment against an in-memory store
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum ReviewerCommand {
    /// Create a reviewer account in the configured database
    Add(ReviewerAddArgs),
    /// Print reviewers in assignment order and the current cursor
    List,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Reviewer {
            command: ReviewerCommand::Add(args),
        } => add_reviewer(args),
        Command::Reviewer {
            command: ReviewerCommand::List,
        } => list_reviewers(),
        Command::Demo(args) => run_demo(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["mortgage-router-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn reviewer_add_requires_email_and_password() {
        assert!(Cli::try_parse_from(["mortgage-router-api", "reviewer", "add"]).is_err());

        let cli = Cli::try_parse_from([
            "mortgage-router-api",
            "reviewer",
            "add",
            "--email",
            "reviewer@example.com",
            "--password",
            "s3cret",
            "--first-name",
            "Rae",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Reviewer {
                command: ReviewerCommand::Add(args),
            }) => {
                assert_eq!(args.email, "reviewer@example.com");
                assert_eq!(args.first_name.as_deref(), Some("Rae"));
                assert!(args.last_name.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn demo_defaults() {
        let cli = Cli::try_parse_from(["mortgage-router-api", "demo"]).expect("parses");
        match cli.command {
            Some(Command::Demo(args)) => {
                assert_eq!(args.reviewers, 3);
                assert_eq!(args.applications, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
