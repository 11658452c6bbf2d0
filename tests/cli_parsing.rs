use clap::Parser;
use sunwell::cli::{Cli, Commands, MemoryCommands, ProviderArg, TrustArg};

#[test]
fn parses_run_with_defaults() {
    let cli = Cli::try_parse_from(["sunwell", "run", "write a changelog entry"]).unwrap();
    match cli.command {
        Commands::Run { goal, plan, provider, model, trust, mirror, model_routing, lens, no_identity, .. } => {
            assert_eq!(goal, "write a changelog entry");
            assert!(!plan);
            assert!(provider.is_none());
            assert!(model.is_none());
            assert_eq!(trust, TrustArg::Workspace);
            assert!(!mirror);
            assert!(!model_routing);
            assert!(lens.is_none());
            assert!(!no_identity);
        }
        _ => panic!("expected Commands::Run"),
    }
}

#[test]
fn parses_run_with_full_flag_set() {
    let cli = Cli::try_parse_from([
        "sunwell",
        "run",
        "refactor the parser",
        "--plan",
        "--provider",
        "anthropic",
        "--model",
        "claude-sonnet-4-5",
        "--time",
        "60",
        "--trust",
        "shell",
        "--mirror",
        "--model-routing",
        "--lens",
        "lenses/rust-reviewer.yaml",
        "--no-identity",
    ])
    .unwrap();

    match cli.command {
        Commands::Run { plan, provider, model, time, trust, mirror, model_routing, lens, no_identity, .. } => {
            assert!(plan);
            assert_eq!(provider, Some(ProviderArg::Anthropic));
            assert_eq!(model.as_deref(), Some("claude-sonnet-4-5"));
            assert_eq!(time, Some(60));
            assert_eq!(trust, TrustArg::Shell);
            assert!(mirror);
            assert!(model_routing);
            assert_eq!(lens.unwrap().to_str().unwrap(), "lenses/rust-reviewer.yaml");
            assert!(no_identity);
        }
        _ => panic!("expected Commands::Run"),
    }
}

#[test]
fn global_json_flag_is_order_independent() {
    let before = Cli::try_parse_from(["sunwell", "--json", "reclaim"]).unwrap();
    let after = Cli::try_parse_from(["sunwell", "reclaim", "--json"]).unwrap();
    assert!(before.json);
    assert!(after.json);
}

#[test]
fn parses_init_force() {
    let cli = Cli::try_parse_from(["sunwell", "init", "--force"]).unwrap();
    match cli.command {
        Commands::Init { force } => assert!(force),
        _ => panic!("expected Commands::Init"),
    }
}

#[test]
fn parses_memory_summary() {
    let cli = Cli::try_parse_from(["sunwell", "memory", "summary"]).unwrap();
    assert!(matches!(cli.command, Commands::Memory(MemoryCommands::Summary)));
}

#[test]
fn run_requires_a_goal_argument() {
    assert!(Cli::try_parse_from(["sunwell", "run"]).is_err());
}

#[test]
fn rejects_unknown_trust_level() {
    assert!(Cli::try_parse_from(["sunwell", "run", "goal", "--trust", "root"]).is_err());
}
