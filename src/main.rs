use chtl_compiler::{CompileContext, CompileError, CompileOutput, Options, compile_unit};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "chtlc")]
#[command(about = "CHTL compiler — HTML templates with scoped styles and enhanced scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile .chtl files to HTML, CSS and JavaScript
    Compile {
        /// Path to a .chtl file or directory
        #[arg(required_unless_present = "stdin")]
        file: Option<PathBuf>,

        /// Read from stdin, write the bundled document to stdout
        #[arg(long)]
        stdin: bool,

        /// Output as JSON (html/css/js/diagnostics)
        #[arg(long)]
        json: bool,

        /// Merge CSS and JS into the generated HTML document
        #[arg(long)]
        bundle: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // One shared context per process; clones share the same caches
    let context = CompileContext::new();
    if let Ok(cwd) = std::env::current_dir() {
        context.set_working_dir(&cwd);
        context.set_output_dir(&cwd);
    }
    context.set_debug_mode(log::log_enabled!(log::Level::Debug));

    match cli.command {
        Commands::Compile { file, stdin, json, bundle } => {
            if stdin {
                compile_stdin(json, &context);
            } else if let Some(path) = file {
                compile_path(&path, json, bundle, &context);
            } else {
                eprintln!("Error: provide a file/directory or use --stdin");
                std::process::exit(1);
            }
        }
    }
}

fn compile_stdin(json_output: bool, context: &CompileContext) {
    let mut source = String::new();
    if io::stdin().read_to_string(&mut source).is_err() {
        eprintln!("Error: failed to read stdin");
        std::process::exit(1);
    }

    let options = Options { filename: "<stdin>".to_string() };
    match compile_unit(&source, options, context) {
        Ok(output) => {
            report_warnings(&output, &source, "<stdin>");
            if json_output {
                println!("{}", serde_json::to_string(&output).expect("output serializes"));
            } else {
                print!("{}", bundle_document(&output));
            }
        }
        Err(error) => {
            report_failure(&error, &source, "<stdin>");
            std::process::exit(1);
        }
    }
}

fn compile_path(path: &Path, json: bool, bundle: bool, context: &CompileContext) {
    if path.is_file() {
        if path.extension().map_or(true, |ext| ext != "chtl") {
            eprintln!("Error: {} is not a .chtl file", path.display());
            std::process::exit(1);
        }
        let start = Instant::now();
        if !compile_file(path, json, bundle, context) {
            std::process::exit(1);
        }
        print_summary(1, start.elapsed());
    } else if path.is_dir() {
        compile_directory(path, json, bundle, context);
    } else {
        eprintln!("Error: {} does not exist", path.display());
        std::process::exit(1);
    }
}

fn compile_directory(dir: &Path, json: bool, bundle: bool, context: &CompileContext) {
    let start = Instant::now();

    // First pass seeds the module cache so units can import each other
    let mut sources: Vec<(PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "chtl"))
    {
        let path = entry.path().to_path_buf();
        match fs::read_to_string(&path) {
            Ok(source) => {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    context.register_module(stem, source.clone());
                }
                sources.push((path, source));
            }
            Err(_) => eprintln!("Error: failed to read {}", path.display()),
        }
    }

    let mut file_count = 0;
    let mut failures = 0;
    for (path, _) in &sources {
        if compile_file(path, json, bundle, context) {
            file_count += 1;
        } else {
            failures += 1;
        }
    }

    if file_count == 0 && failures == 0 {
        eprintln!("No .chtl files found in {}", dir.display());
        std::process::exit(1);
    }
    print_summary(file_count, start.elapsed());
    if failures > 0 {
        std::process::exit(1);
    }
}

fn compile_file(path: &Path, json: bool, bundle: bool, context: &CompileContext) -> bool {
    let Ok(source) = fs::read_to_string(path) else {
        eprintln!("Error: failed to read {}", path.display());
        return false;
    };
    let filename = path.display().to_string();

    let options = Options { filename: filename.clone() };
    let output = match compile_unit(&source, options, context) {
        Ok(output) => output,
        Err(error) => {
            report_failure(&error, &source, &filename);
            return false;
        }
    };
    report_warnings(&output, &source, &filename);

    if json {
        let sidecar = path.with_extension("json");
        let payload = serde_json::to_string_pretty(&output).expect("output serializes");
        if fs::write(&sidecar, payload).is_err() {
            eprintln!("Error: failed to write {}", sidecar.display());
            return false;
        }
        print_generated(&sidecar.display().to_string());
        return true;
    }

    let html_path = path.with_extension("html");
    let document =
        if bundle { bundle_document(&output) } else { output.html.clone() };
    if fs::write(&html_path, document).is_err() {
        eprintln!("Error: failed to write {}", html_path.display());
        return false;
    }
    print_generated(&html_path.display().to_string());

    if !bundle {
        if !output.css.is_empty() {
            let css_path = path.with_extension("css");
            if fs::write(&css_path, &output.css).is_err() {
                eprintln!("Error: failed to write {}", css_path.display());
                return false;
            }
            print_generated(&css_path.display().to_string());
        }
        if !output.js.is_empty() {
            let js_path = path.with_extension("js");
            if fs::write(&js_path, &output.js).is_err() {
                eprintln!("Error: failed to write {}", js_path.display());
                return false;
            }
            print_generated(&js_path.display().to_string());
        }
    }
    true
}

/// Merge the three streams into one document: the style block goes in
/// before `</head>`, the script block before `</body>`.
fn bundle_document(output: &CompileOutput) -> String {
    let mut document = output.html.clone();
    if !output.css.is_empty() {
        let block = format!("<style>\n{}</style>\n", output.css);
        match document.find("</head>") {
            Some(index) => document.insert_str(index, &block),
            None => document.push_str(&block),
        }
    }
    if !output.js.is_empty() {
        let block = format!("<script>\n{}</script>\n", output.js);
        match document.find("</body>") {
            Some(index) => document.insert_str(index, &block),
            None => document.push_str(&block),
        }
    }
    document
}

/// Print the full diagnostic list before exiting non-zero.
fn report_failure(error: &CompileError, source: &str, filename: &str) {
    for diagnostic in error.diagnostics() {
        eprint!("{}", diagnostic.render(source, filename));
    }
    let count = error.diagnostics().len();
    let problems = if count == 1 { "error" } else { "errors" };
    eprintln!("Failed with {} {}", count, problems);
}

fn report_warnings(output: &CompileOutput, source: &str, filename: &str) {
    for diagnostic in &output.diagnostics {
        eprint!("{}", diagnostic.render(source, filename));
    }
}

fn print_generated(path: &str) {
    if io::stderr().is_terminal() {
        eprintln!("  \x1b[32m✓\x1b[0m {}", path);
    } else {
        eprintln!("  ✓ {}", path);
    }
}

fn print_summary(count: usize, elapsed: std::time::Duration) {
    let files_word = if count == 1 { "file" } else { "files" };
    let time_str = format_duration(elapsed);
    if io::stderr().is_terminal() {
        eprintln!("\n\x1b[1mCompiled {} {} in {}\x1b[0m", count, files_word, time_str);
    } else {
        eprintln!("\nCompiled {} {} in {}", count, files_word, time_str);
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let micros = d.as_micros();
    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{:.1}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}
