use clap::{CommandFactory, Parser};
use colored::*;
use std::io::Write;
use std::process;
use std::sync::Arc;

use harrier_core::{
    built_in_registry, init_logging, installer, load_targets, ModuleCategory, ModuleRegistry,
    Orchestrator, ReportFormat, Scan, ScanConfig, ScanStatus,
};

#[derive(Parser, Debug)]
#[command(
    name = "HARRIER",
    author = "Harrier Team",
    version,
    about = "Modular attack-surface scanner",
    override_usage = "harrier <target>  <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Quick scan:                  harrier example.com
  Deep scan:                   harrier example.com --deep
  Scan from file:              harrier -l targets.txt
  All bleeding-edge modules:   harrier example.com --bleeding-edge
  Patch drafting only:         harrier example.com --generate-patch
  LLM triage:                  harrier example.com --llm-model gpt-4o-mini
  Skip a module:               harrier example.com --exclude nmap
  Markdown report only:        harrier example.com --format markdown
  List modules:                harrier --list-modules
  Dry-run test:                harrier example.com --dry-run"
)]
pub struct Args {
    #[arg(required_unless_present_any = ["list", "update", "list_modules"])]
    pub target: Option<String>,

    #[arg(short = 'l', long = "list", help = "File containing targets (one per line)")]
    pub list: Option<String>,

    #[arg(short = 't', long, default_value_t = 50, help = "Number of concurrent threads")]
    pub threads: usize,

    #[arg(long, default_value_t = 10, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[arg(long, default_value_t = 150, help = "Max requests per second")]
    pub rate_limit: u64,

    #[arg(short = 'o', long, default_value = "harrier_results.json", help = "Output file path for JSON results")]
    pub output: String,

    #[arg(long, default_value = "reports", help = "Directory for rendered reports")]
    pub report_dir: String,

    #[arg(long, default_value = "all",
        value_parser = clap::builder::PossibleValuesParser::new(["json", "markdown", "all"]),
        help = "Report format")]
    pub format: String,

    #[arg(short = 'v', long, default_value_t = false, help = "Verbose logging")]
    pub verbose: bool,

    #[arg(long, default_value_t = false, help = "Deep scan: wider port range and all template severities")]
    pub deep: bool,

    #[arg(long, default_value_t = false, help = "Stealth mode: rotate User-Agents")]
    pub stealth: bool,

    #[arg(long, default_value_t = false, help = "Aggressive timing for port scans")]
    pub aggressive: bool,

    #[arg(long, default_value_t = false, help = "Disable adaptive throttling")]
    pub no_throttle: bool,

    #[arg(long, default_value_t = false, help = "Run modules inside a network namespace when available")]
    pub isolate: bool,

    #[arg(long = "exclude", help = "Module name to skip (repeatable)")]
    pub exclude: Vec<String>,

    #[arg(long, default_value_t = false, help = "Run every bleeding-edge module")]
    pub bleeding_edge: bool,

    #[arg(long, help = "LLM model for finding triage (enables llm-fuzzer)")]
    pub llm_model: Option<String>,

    #[arg(long, default_value_t = 0.7, help = "LLM sampling temperature")]
    pub temperature: f64,

    #[arg(long, default_value_t = false, help = "Draft patches and WAF rules (auto-patch)")]
    pub generate_patch: bool,

    #[arg(long, default_value_t = false, help = "Verify response parity (shadow-clone)")]
    pub shadow_clone: bool,

    #[arg(long, default_value_t = false, help = "Estimate supply-chain drift (dep-drift)")]
    pub dep_drift: bool,

    #[arg(long, default_value_t = false, help = "Profile TCP connect timing (timing-map)")]
    pub timing_map: bool,

    #[arg(long, default_value_t = false, help = "Draft detection rules (blue-team)")]
    pub blue_team: bool,

    #[arg(long, help = "Update Harrier and its tools to the latest version")]
    pub update: bool,

    #[arg(long = "list-modules", help = "List available modules and exit")]
    pub list_modules: bool,

    #[arg(long, help = "Simulate scan without sending real requests")]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);
    print_banner();

    if args.update {
        installer::run_full_update().await;
        process::exit(0);
    }

    let registry = match built_in_registry() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprint!(
                "{}\r\n",
                format!("[!] Module registry setup failed: {}", e).red().bold()
            );
            process::exit(1);
        }
    };

    if args.list_modules {
        print_module_listing(&registry);
        process::exit(0);
    }

    let mut targets: Vec<String> = Vec::new();

    if let Some(ref list_path) = args.list {
        match load_targets(list_path) {
            Ok(lines) => {
                print!(
                    "{}\r\n",
                    format!("[+] Loaded {} target(s) from {}", lines.len(), list_path)
                        .green()
                        .bold()
                );
                std::io::stdout().flush().ok();
                targets.extend(lines);
            }
            Err(e) => {
                eprint!(
                    "{}\r\n",
                    format!("[!] Failed to read '{}': {}", list_path, e).red()
                );
                process::exit(1);
            }
        }
    }

    if let Some(ref t) = args.target {
        targets.push(t.clone());
    }

    if targets.is_empty() {
        eprint!(
            "{}\r\n",
            "[!] No targets specified. Provide a target or use -l <file>.".red()
        );
        let mut cmd = Args::command();
        cmd.print_help().ok();
        process::exit(1);
    }

    let config = build_config(&args, targets);

    if args.dry_run {
        print_scan_config(&config);
        for target in &config.targets {
            println!("[DRY RUN] Would scan target: {}", target);
        }
        process::exit(0);
    }

    print_scan_config(&config);
    installer::ensure_tools().await;

    let scan = Arc::new(Scan::new(config));
    let orchestrator = Arc::new(Orchestrator::new(registry, Arc::clone(&scan)));

    // Ctrl-C requests a cooperative stop; the pipeline finishes the phase
    // it is in and skips the rest.
    let token = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            print!(
                "\r\n{}\r\n",
                "[!] Interrupt received, stopping after the current phase..."
                    .yellow()
                    .bold()
            );
            std::io::stdout().flush().ok();
            token.cancel();
        }
    });

    match orchestrator.run().await {
        Ok(ScanStatus::Completed) => {
            print_summary(&scan).await;
        }
        Ok(ScanStatus::Cancelled) => {
            print!("{}\r\n", "[!] Scan cancelled.".yellow().bold());
            std::io::stdout().flush().ok();
            process::exit(130);
        }
        Err(e) => {
            eprint!("{}\r\n", format!("[!] Scan failed: {:#}", e).red().bold());
            process::exit(1);
        }
    }
}

/// Prints the HARRIER ASCII banner.
fn print_banner() {
    let banner = r#"
     _   _    _    ____  ____  ___ _____ ____
    | | | |  / \  |  _ \|  _ \|_ _| ____|  _ \
    | |_| | / _ \ | |_) | |_) || ||  _| | |_) |
    |  _  |/ ___ \|  _ <|  _ < | || |___|  _ <
    |_| |_/_/   \_\_| \_\_| \_\___|_____|_| \_\
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "    Modular attack-surface scanner".dimmed());
    print!(
        "{}\r\n",
        "──────────────────────────────────────────────────".dimmed()
    );
    std::io::stdout().flush().ok();
}

/// Maps CLI flags onto the engine configuration. `--bleeding-edge` on its
/// own switches every bleeding-edge module on; any individual module flag
/// implies the phase without dragging the others in.
fn build_config(args: &Args, targets: Vec<String>) -> ScanConfig {
    let any_module_flag = args.llm_model.is_some()
        || args.generate_patch
        || args.shadow_clone
        || args.dep_drift
        || args.timing_map
        || args.blue_team;
    let enable_all = args.bleeding_edge && !any_module_flag;

    ScanConfig {
        targets,
        exclude: args.exclude.clone(),
        output: args.output.clone(),
        report_dir: args.report_dir.clone(),
        format: args.format.parse::<ReportFormat>().unwrap_or_default(),
        threads: args.threads,
        rate_limit: args.rate_limit,
        timeout: args.timeout,
        deep: args.deep,
        bleeding_edge: args.bleeding_edge || any_module_flag,
        stealth: args.stealth,
        aggressive: args.aggressive,
        no_throttle: args.no_throttle,
        isolate: args.isolate,
        llm_model: args.llm_model.clone().unwrap_or_default(),
        temperature: args.temperature,
        generate_patch: args.generate_patch || enable_all,
        shadow_clone: args.shadow_clone || enable_all,
        dep_drift: args.dep_drift || enable_all,
        timing_map: args.timing_map || enable_all,
        blue_team: args.blue_team || enable_all,
    }
}

fn print_module_listing(registry: &ModuleRegistry) {
    print!("{}\r\n", "Available modules:".bright_white().bold());

    let mut current: Option<ModuleCategory> = None;
    for module in registry.listing() {
        if current != Some(module.category()) {
            current = Some(module.category());
            print!(
                "\r\n{}\r\n",
                format!("  [{}]", module.category()).bright_cyan().bold()
            );
        }
        print!(
            "    {:<14} {}  {}\r\n",
            module.name().green(),
            module.description(),
            format!("v{}", module.version()).dimmed()
        );
    }
    std::io::stdout().flush().ok();
}

/// Prints the scan configuration summary.
fn print_scan_config(config: &ScanConfig) {
    print!(
        "{}\r\n",
        format!("[+] Targets:    {}", config.targets.len()).green().bold()
    );
    print!("{}\r\n", format!("[+] Threads:    {}", config.threads).blue());
    print!("{}\r\n", format!("[+] Timeout:    {}s", config.timeout).blue());
    print!(
        "{}\r\n",
        format!("[+] Rate Limit: {} req/s", config.rate_limit).blue()
    );
    print!("{}\r\n", format!("[+] Output:     {}", config.output).blue());
    print!(
        "{}\r\n",
        format!("[+] Reports:    {} ({})", config.report_dir, config.format).blue()
    );

    if config.deep {
        print!("{}\r\n", "[+] Deep:       ON".magenta().bold());
    }
    if config.stealth {
        print!("{}\r\n", "[+] Stealth:    ON".magenta());
    }
    if config.aggressive {
        print!("{}\r\n", "[+] Aggressive: ON".magenta());
    }
    if config.isolate {
        print!("{}\r\n", "[+] Isolation:  requested".magenta());
    }
    if config.no_throttle {
        print!("{}\r\n", "[+] Throttle:   OFF".yellow());
    }
    if config.bleeding_edge {
        let mut enabled = Vec::new();
        if !config.llm_model.is_empty() {
            enabled.push("llm-fuzzer");
        }
        if config.generate_patch {
            enabled.push("auto-patch");
        }
        if config.shadow_clone {
            enabled.push("shadow-clone");
        }
        if config.dep_drift {
            enabled.push("dep-drift");
        }
        if config.timing_map {
            enabled.push("timing-map");
        }
        if config.blue_team {
            enabled.push("blue-team");
        }
        print!(
            "{}\r\n",
            format!("[+] Bleeding:   {}", enabled.join(", ")).yellow().bold()
        );
    }
    if !config.exclude.is_empty() {
        print!(
            "{}\r\n",
            format!("[+] Excluded:   {}", config.exclude.join(", ")).yellow()
        );
    }
    print!(
        "{}\r\n",
        "──────────────────────────────────────────────────".dimmed()
    );
    std::io::stdout().flush().ok();
}

/// Prints the post-scan summary block.
async fn print_summary(scan: &Scan) {
    let results = scan.results.snapshot().await;
    let summary = &results.summary;

    print!(
        "\r\n{}\r\n",
        "──────────────── Scan Summary ────────────────".dimmed()
    );
    print!(
        "{}\r\n",
        format!(
            "[+] Hosts:       {} alive / {} total",
            summary.alive_hosts, summary.total_hosts
        )
        .green()
    );
    print!(
        "{}\r\n",
        format!("[+] Open ports:  {}", summary.open_ports).blue()
    );
    print!(
        "{}\r\n",
        format!("[+] Findings:    {}", summary.total_vulns).bright_white().bold()
    );
    if summary.critical_vulns > 0 {
        print!(
            "{}\r\n",
            format!("      critical:  {}", summary.critical_vulns).red().bold()
        );
    }
    if summary.high_vulns > 0 {
        print!("{}\r\n", format!("      high:      {}", summary.high_vulns).red());
    }
    if summary.medium_vulns > 0 {
        print!(
            "{}\r\n",
            format!("      medium:    {}", summary.medium_vulns).yellow()
        );
    }
    if summary.low_vulns > 0 {
        print!("{}\r\n", format!("      low:       {}", summary.low_vulns).blue());
    }
    print!(
        "{}\r\n",
        format!("[+] Exploitable: {}", summary.exploitable_vulns).magenta()
    );
    print!(
        "{}\r\n",
        format!("[+] High risk:   {}", summary.high_risk_vulns).magenta()
    );

    let score_line = format!("[+] Risk score:  {:.2}", summary.risk_score);
    if summary.risk_score >= 70.0 {
        print!("{}\r\n", score_line.red().bold());
    } else if summary.risk_score >= 40.0 {
        print!("{}\r\n", score_line.yellow().bold());
    } else {
        print!("{}\r\n", score_line.green().bold());
    }

    let modules = if summary.modules_executed.is_empty() {
        "none".to_string()
    } else {
        summary.modules_executed.join(", ")
    };
    print!("{}\r\n", format!("[+] Modules:     {}", modules).blue());
    print!(
        "{}\r\n",
        format!("[+] Duration:    {:.1}s", summary.duration_secs).blue()
    );
    std::io::stdout().flush().ok();
}
