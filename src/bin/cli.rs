//! MiniDB - interactive SQL shell
//!
//! Runs an interactive prompt, or executes a script file passed as the
//! first argument. Statements end at `;`. The `: read <path>` directive
//! executes a nested script; `exit` or `quit` leaves the shell.

use std::path::Path;
use std::process::ExitCode;

use minidb::executor::{EngineConfig, ExecutionEngine, QueryResult};
use minidb::sql::ast::Statement;
use minidb::sql::Parser;
use minidb::storage::Row;
use minidb::Error;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

/// What the session should do after processing some input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Continue,
    Exit,
    /// Unrecoverable I/O failure during DDL; the catalog may be
    /// inconsistent on disk.
    Fatal,
}

fn print_help() {
    println!(
        r#"
Supported SQL:
  CREATE TABLE t (col TYPE [PRIMARY KEY], ..., [PRIMARY KEY(col)],
                  [FOREIGN KEY (col) REFERENCES t2(col)]);
  DROP TABLE t;
  INSERT INTO t [(col, ...)] VALUES (v, ...), ...;
  SELECT cols FROM t [JOIN t2 ON cond] [WHERE cond]
         [GROUP BY col] [ORDER BY col [ASC|DESC]];
  UPDATE t SET col = expr, ... [WHERE cond];
  DELETE FROM t [WHERE cond];

Types: INT, FLOAT, VARCHAR[(n)]
Shell: exit | quit            leave the shell
       : read <path>          execute a script file
       help                   show this message
"#
    );
}

/// Format query results as an ASCII table.
fn format_results(columns: &[String], rows: &[Row]) -> String {
    if columns.is_empty() && rows.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(value.to_string().len());
            }
        }
    }

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(*w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+\n", separator);

    let mut output = String::new();
    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:^width$} ", c, width = *w))
        .collect::<Vec<_>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));
    output.push_str(&separator);

    for row in rows {
        let row_str: String = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:>width$} ", v.to_string(), width = *w))
            .collect::<Vec<_>>()
            .join("|");
        output.push_str(&format!("|{}|\n", row_str));
    }

    if !rows.is_empty() {
        output.push_str(&separator);
    }
    output.push_str(&format!("{} row(s) returned\n", rows.len()));
    output
}

fn print_result(result: QueryResult) {
    if let Some(msg) = result.message {
        println!("{}", msg);
    } else {
        print!("{}", format_results(&result.columns, &result.rows));
    }
}

struct Session {
    engine: ExecutionEngine,
}

impl Session {
    /// Parse and run a buffered chunk of SQL. Compilation errors print and
    /// the session continues; I/O failures during DDL are fatal.
    fn execute_sql(&mut self, sql: &str) -> Outcome {
        let mut parser = match Parser::new(sql) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}", e);
                return Outcome::Continue;
            }
        };

        for parsed in parser.parse_script() {
            match parsed {
                Err(e) => eprintln!("{}", e),
                Ok(stmt) => {
                    let is_ddl = matches!(
                        stmt,
                        Statement::CreateTable(_) | Statement::DropTable(_)
                    );
                    match self.engine.execute(stmt) {
                        Ok(result) => print_result(result),
                        Err(Error::Io(e)) if is_ddl => {
                            eprintln!("fatal I/O error during DDL: {}", e);
                            return Outcome::Fatal;
                        }
                        Err(e) => eprintln!("{}", e),
                    }
                }
            }
        }
        Outcome::Continue
    }

    /// Feed one input line into the statement buffer, handling shell
    /// directives when the buffer is empty.
    fn handle_line(&mut self, line: &str, buffer: &mut String) -> Outcome {
        let trimmed = line.trim();

        if buffer.is_empty() {
            if trimmed.is_empty() {
                return Outcome::Continue;
            }

            if let Some(directive) = trimmed.strip_prefix(':') {
                let directive = directive.trim();
                if let Some(path) = directive.strip_prefix("read ") {
                    return self.run_script(Path::new(path.trim()));
                }
                eprintln!("unknown directive ': {}'", directive);
                return Outcome::Continue;
            }

            let meta = trimmed.trim_end_matches(';').trim().to_lowercase();
            match meta.as_str() {
                "exit" | "quit" => return Outcome::Exit,
                "help" => {
                    print_help();
                    return Outcome::Continue;
                }
                _ => {}
            }
        }

        buffer.push_str(line);
        buffer.push('\n');

        if trimmed.ends_with(';') {
            let sql = std::mem::take(buffer);
            return self.execute_sql(&sql);
        }
        Outcome::Continue
    }

    /// Execute a script file line by line.
    fn run_script(&mut self, path: &Path) -> Outcome {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("cannot read script '{}': {}", path.display(), e);
                return Outcome::Continue;
            }
        };

        let mut buffer = String::new();
        for line in content.lines() {
            match self.handle_line(line, &mut buffer) {
                Outcome::Continue => {}
                other => return other,
            }
        }

        // A trailing fragment without `;` still gets reported.
        if !buffer.trim().is_empty() {
            return self.execute_sql(&buffer);
        }
        Outcome::Continue
    }

    /// Interactive read-eval-print loop.
    fn run_repl(&mut self) -> Outcome {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("cannot initialize line editor: {}", e);
                return Outcome::Exit;
            }
        };

        println!("MiniDB shell. Type 'help' for help, 'exit' to quit.");
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { "SQL > " } else { "  ... " };
            match rl.readline(prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = rl.add_history_entry(line.as_str());
                    }
                    match self.handle_line(&line, &mut buffer) {
                        Outcome::Continue => {}
                        other => return other,
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    buffer.clear();
                    println!("(statement discarded)");
                }
                Err(ReadlineError::Eof) => return Outcome::Exit,
                Err(e) => {
                    eprintln!("input error: {}", e);
                    return Outcome::Exit;
                }
            }
        }
    }
}

/// Route tracing output into log/, falling back to stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = std::fs::create_dir_all("log").ok().and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("log/minidb.log")
            .ok()
    });

    match file {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

fn main() -> ExitCode {
    init_logging();

    let engine = match ExecutionEngine::open("data", EngineConfig::default()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("startup failed: {}", e);
            return ExitCode::from(1);
        }
    };
    let mut session = Session { engine };

    let outcome = match std::env::args().nth(1) {
        Some(script) => session.run_script(Path::new(&script)),
        None => session.run_repl(),
    };

    if outcome == Outcome::Fatal {
        return ExitCode::from(2);
    }

    match session.engine.shutdown() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("shutdown failed: {}", e);
            ExitCode::from(2)
        }
    }
}
