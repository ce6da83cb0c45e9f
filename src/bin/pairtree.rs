//! # pairtree CLI Driver
//!
//! Line-oriented front end over a string-keyed tree. The first input line
//! gives the number of commands, then each line is one of:
//!
//! ```text
//! insert <key> <value>
//! delete <key> <value>
//! find <key>
//! ```
//!
//! Every `find` prints the values bound to the key, space separated, or
//! the literal `null` when the key is absent.
//!
//! ## Usage
//!
//! ```bash
//! # Run against a store (created on first use)
//! pairtree ./output/a < commands.txt
//!
//! # Show version / help
//! pairtree --version
//! pairtree --help
//! ```

use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;

use eyre::{bail, eyre, Result, WrapErr};
use pairtree::{BPlusTree, FixedStr};

const KEY_WIDTH: usize = 68;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut store_path: Option<PathBuf> = None;
    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("pairtree {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            arg if arg.starts_with('-') => {
                bail!("Unknown option: {}", arg);
            }
            path => {
                if store_path.is_some() {
                    bail!("Multiple store paths specified");
                }
                store_path = Some(PathBuf::from(path));
            }
        }
    }

    let store_path = match store_path {
        Some(p) => p,
        None => {
            print_usage();
            return Ok(());
        }
    };

    let mut tree: BPlusTree<FixedStr<KEY_WIDTH>, i32> = BPlusTree::open(&store_path)?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let n: usize = lines
        .next()
        .ok_or_else(|| eyre!("missing command count"))??
        .trim()
        .parse()
        .wrap_err("invalid command count")?;

    for _ in 0..n {
        let line = lines.next().ok_or_else(|| eyre!("unexpected end of input"))??;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };

        match command {
            "insert" => {
                let key = parse_key(words.next())?;
                let val = parse_value(words.next())?;
                tree.insert(&key, &val)?;
            }
            "delete" => {
                let key = parse_key(words.next())?;
                let val = parse_value(words.next())?;
                tree.erase(&key, &val)?;
            }
            "find" => {
                let key = parse_key(words.next())?;
                let values = tree.find(&key)?;
                if values.is_empty() {
                    writeln!(out, "null")?;
                } else {
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            write!(out, " ")?;
                        }
                        write!(out, "{}", v)?;
                    }
                    writeln!(out)?;
                }
            }
            other => bail!("unknown command: {}", other),
        }
    }

    out.flush()?;
    tree.close()
}

fn parse_key(word: Option<&str>) -> Result<FixedStr<KEY_WIDTH>> {
    word.ok_or_else(|| eyre!("missing key"))?.parse()
}

fn parse_value(word: Option<&str>) -> Result<i32> {
    word.ok_or_else(|| eyre!("missing value"))?
        .parse()
        .wrap_err("invalid value")
}

fn print_usage() {
    println!("pairtree - persistent B+ tree index driver");
    println!();
    println!("USAGE:");
    println!("    pairtree <store-path> < commands");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Show this help");
    println!("    -v, --version    Show version");
    println!();
    println!("PROTOCOL:");
    println!("    First line: number of commands N, then N lines of");
    println!("    insert <key> <value> | delete <key> <value> | find <key>");
}
