use clap::Parser as ClapParser;
use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process,
    rc::Rc,
};

use object::{NativeFunction, Table, Value};
use tracing_subscriber::EnvFilter;
use vm::{compile, ModuleError};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The .alto files to execute in order
    #[arg(required = false)]
    files: Vec<String>,

    /// Start a REPL after executing files (default if no files)
    #[arg(long)]
    repl: bool,

    /// Print the compiled instruction listing instead of executing
    #[arg(long)]
    disasm: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let host = Rc::new(Host::default());

    for filename in &cli.files {
        let source = match fs::read_to_string(filename) {
            Ok(content) => content,
            Err(err) => {
                eprintln!("Error reading file '{}': {}", filename, err);
                process::exit(1);
            }
        };

        if cli.disasm {
            match compile(&source) {
                Ok(module) => print!("{}", module.disassemble()),
                Err(err) => {
                    eprintln!("Error compiling {}: {}", filename, err);
                    process::exit(1);
                }
            }
            continue;
        }

        let dir = Path::new(filename)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if let Err(err) = execute(&host, &source, &dir) {
            eprintln!("Error executing {}: {}", filename, err);
            process::exit(1);
        }
    }

    if cli.repl || (cli.files.is_empty() && !cli.disasm) {
        run_repl(&host);
    }
}

fn run_repl(host: &Rc<Host>) {
    println!("Alto REPL");
    println!("Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input_buffer = String::new();
    let cwd = PathBuf::from(".");

    loop {
        print!("> ");
        if let Err(err) = stdout.flush() {
            eprintln!("Error flushing stdout: {}", err);
            break;
        }

        input_buffer.clear();
        match stdin.read_line(&mut input_buffer) {
            Ok(0) => break,
            Ok(_) => {
                let input = input_buffer.trim();
                if input == "exit" {
                    break;
                }
                if input.is_empty() {
                    continue;
                }

                match execute(host, &input_buffer, &cwd) {
                    Ok(value) => println!("{}", value),
                    Err(err) => eprintln!("Error: {}", err),
                }
            }
            Err(err) => {
                eprintln!("Error reading input: {}", err);
                break;
            }
        }
    }
}

/// The host side of the interpreter: compiles sources and satisfies
/// imports with built-in tables or filesystem modules.
#[derive(Default)]
struct Host {
    /// Loaded module exports, keyed by resolved path. An entry is
    /// cached before its module body runs so import cycles terminate.
    modules: RefCell<HashMap<PathBuf, Value>>,
}

fn execute(
    host: &Rc<Host>,
    source: &str,
    dir: &Path,
) -> Result<Value, String> {
    let module = compile(source).map_err(|err| err.to_string())?;
    let host = host.clone();
    let dir = dir.to_path_buf();
    module.on_importing(move |_module, import| {
        if let Some(value) = resolve(&host, &import.name, &dir) {
            *import.value.borrow_mut() = value;
        }
    });
    vm::main(&module, &[]).map_err(format_module_error)
}

fn resolve(host: &Rc<Host>, name: &str, dir: &Path) -> Option<Value> {
    match name {
        "console" => Some(console_table()),
        "math" => Some(math_table()),
        path => load_module(host, path, dir),
    }
}

fn load_module(host: &Rc<Host>, name: &str, dir: &Path) -> Option<Value> {
    let mut path = dir.join(name);
    if path.extension().is_none() {
        path.set_extension("alto");
    }
    if let Some(cached) = host.modules.borrow().get(&path) {
        return Some(cached.clone());
    }

    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "module read failed");
            return None;
        }
    };
    let module = match compile(&source) {
        Ok(module) => module,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "module compile failed");
            return None;
        }
    };

    host.modules
        .borrow_mut()
        .insert(path.clone(), module.exports());
    let subhost = host.clone();
    let subdir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    module.on_importing(move |_module, import| {
        if let Some(value) = resolve(&subhost, &import.name, &subdir) {
            *import.value.borrow_mut() = value;
        }
    });
    match vm::main(&module, &[]) {
        Ok(_) => Some(module.exports()),
        Err(err) => {
            tracing::warn!(path = %path.display(), err = %format_module_error(err), "module run failed");
            host.modules.borrow_mut().remove(&path);
            None
        }
    }
}

fn format_module_error(err: ModuleError) -> String {
    match err {
        ModuleError::Exception(value) => {
            let mut out = format!("uncaught exception: {}", value);
            if let Some(trace) =
                value.as_exception().and_then(|e| e.trace_text())
            {
                out.push('\n');
                out.push_str(&trace);
            }
            out
        }
        other => other.to_string(),
    }
}

/// The built-in `console` module.
fn console_table() -> Value {
    let mut table = Table::new();
    table.insert(
        Value::string("log"),
        NativeFunction::new("log", |_recv, args| {
            let line: Vec<String> =
                args.iter().map(|a| a.to_text()).collect();
            println!("{}", line.join(" "));
            Ok(Value::Null)
        }),
    );
    Value::table(table)
}

/// The built-in `math` module.
fn math_table() -> Value {
    fn unary(name: &str, f: fn(f64) -> f64) -> Value {
        NativeFunction::new(name, move |_recv, args| {
            let n = args.first().map(|a| a.to_number()).unwrap_or(f64::NAN);
            Ok(Value::Number(f(n)))
        })
    }

    let mut table = Table::new();
    table.insert(Value::string("floor"), unary("floor", f64::floor));
    table.insert(Value::string("ceil"), unary("ceil", f64::ceil));
    table.insert(Value::string("sqrt"), unary("sqrt", f64::sqrt));
    table.insert(Value::string("abs"), unary("abs", f64::abs));
    table.insert(
        Value::string("min"),
        NativeFunction::new("min", |_recv, args| {
            let result = args
                .iter()
                .map(|a| a.to_number())
                .fold(f64::INFINITY, f64::min);
            Ok(Value::Number(result))
        }),
    );
    table.insert(
        Value::string("max"),
        NativeFunction::new("max", |_recv, args| {
            let result = args
                .iter()
                .map(|a| a.to_number())
                .fold(f64::NEG_INFINITY, f64::max);
            Ok(Value::Number(result))
        }),
    );
    table.insert(Value::string("pi"), Value::Number(std::f64::consts::PI));
    Value::table(table)
}
