//! The interactive shell (§4.O): reads a line, tokenizes it, dispatches to
//! a fixed builtin or launches an external program.
//!
//! Runs as the system's first kernel task rather than a user-mode one:
//! there is no running address space yet for `fork`/`execv` to operate on
//! at boot, so external commands go through [`crate::process::spawn`]
//! instead, which builds a brand-new user task directly from a path. This
//! is the same primitive the shell uses for every external command it
//! launches afterward.

use alloc::{string::String, vec::Vec};

use crate::drivers::{console, keyboard};

const PROMPT: &str = "$ ";

/// Shell state: just the working directory, tracked as an inode the way
/// every other file-system entry point is.
struct Shell {
    cwd_inode: u32,
    pid: crate::process::Pid,
}

/// Build the shell's kernel task and hand it to the scheduler. Called once
/// from [`super::init`] at boot.
pub fn spawn_init() {
    let task = crate::sched::task::Task::create_kernel("shell", shell_entry, 0)
        .expect("failed to create shell task");
    crate::sched::spawn(task);
}

extern "C" fn shell_entry(_arg: usize) -> ! {
    let pid = unsafe { crate::sched::current_task_ptr().as_ref() }.pid;
    let mut shell = Shell {
        cwd_inode: root_inode(),
        pid,
    };
    shell.run();
}

fn root_inode() -> u32 {
    // The mounted root's inode number is always 0 by construction (§4.M
    // format lays the root directory down first); getcwd on it degenerates
    // to "/" regardless, so a fixed constant is fine here.
    0
}

impl Shell {
    fn run(&mut self) -> ! {
        loop {
            let cwd = crate::fs::getcwd(self.cwd_inode).unwrap_or_else(|_| String::from("/"));
            crate::print!("{}{}", cwd, PROMPT);
            let line = self.read_line();
            let argv = tokenize(&line);
            if argv.is_empty() {
                continue;
            }
            self.execute(&argv);
        }
    }

    /// Read one line from the keyboard, echoing to the console and
    /// handling backspace, Ctrl-L (clear + redraw), and Ctrl-U (erase
    /// line).
    fn read_line(&self) -> String {
        let mut buf = String::new();
        loop {
            let byte = unsafe { keyboard::read_key_blocking() };
            let ctrl = keyboard::get_modifiers() & keyboard::MOD_CTRL != 0;

            if ctrl && (byte == b'l' || byte == b'L') {
                console::clear();
                let cwd = crate::fs::getcwd(self.cwd_inode).unwrap_or_else(|_| String::from("/"));
                crate::print!("{}{}{}", cwd, PROMPT, buf);
                continue;
            }
            if ctrl && (byte == b'u' || byte == b'U') {
                erase(&mut buf, buf.len());
                continue;
            }

            match byte {
                b'\r' | b'\n' => {
                    console::putchar(b'\n');
                    break;
                }
                0x08 | 0x7f => erase(&mut buf, 1),
                0 => {}
                ch => {
                    console::putchar(ch);
                    buf.push(ch as char);
                }
            }
        }
        buf
    }

    fn execute(&mut self, argv: &[String]) {
        let name = argv[0].as_str();
        let args = &argv[1..];
        let result = match name {
            "pwd" => self.cmd_pwd(),
            "cd" => self.cmd_cd(args),
            "ls" => self.cmd_ls(args),
            "ps" => self.cmd_ps(),
            "clear" => {
                console::clear();
                Ok(())
            }
            "mkdir" => self.cmd_mkdir(args),
            "rmdir" => self.cmd_rmdir(args),
            "rm" => self.cmd_rm(args),
            _ => {
                self.run_external(name, argv);
                return;
            }
        };
        if let Err(e) = result {
            crate::println!("{}: {:?}", name, e);
        }
    }

    fn cmd_pwd(&self) -> crate::error::KernelResult<()> {
        crate::println!("{}", crate::fs::getcwd(self.cwd_inode)?);
        Ok(())
    }

    fn cmd_cd(&mut self, args: &[String]) -> crate::error::KernelResult<()> {
        let target = args.first().map(String::as_str).unwrap_or("/");
        self.cwd_inode = crate::fs::chdir(target, self.cwd_inode)?;
        Ok(())
    }

    fn cmd_ls(&self, args: &[String]) -> crate::error::KernelResult<()> {
        let long = args.iter().any(|a| a == "-l");
        let path = args
            .iter()
            .find(|a| !a.starts_with('-'))
            .map(String::as_str)
            .unwrap_or(".");
        let handle = crate::fs::opendir(path, self.cwd_inode)?;
        loop {
            match crate::fs::readdir(handle)? {
                Some(entry) => {
                    let marker = if entry.file_type == crate::fs::FileType::Directory {
                        '/'
                    } else {
                        ' '
                    };
                    if long {
                        let mut entry_path = String::from(path);
                        if !entry_path.ends_with('/') {
                            entry_path.push('/');
                        }
                        entry_path.push_str(entry.name());
                        let size = crate::fs::stat(&entry_path, self.cwd_inode)
                            .map(|s| s.size)
                            .unwrap_or(0);
                        crate::println!("{:>8} {}{}", size, entry.name(), marker);
                    } else {
                        crate::println!("{}{}", entry.name(), marker);
                    }
                }
                None => break,
            }
        }
        crate::fs::closedir(handle)?;
        Ok(())
    }

    fn cmd_ps(&self) -> crate::error::KernelResult<()> {
        crate::println!("{:>6} {:<10} {}", "PID", "STATE", "NAME");
        crate::sched::for_each_task(|task| {
            crate::println!(
                "{:>6} {:<10} {}",
                task.pid,
                state_name(task.state),
                task.name_str()
            );
        });
        Ok(())
    }

    fn cmd_mkdir(&self, args: &[String]) -> crate::error::KernelResult<()> {
        let path = args
            .first()
            .ok_or(crate::error::KernelError::InvalidArgument {
                name: "path",
                value: "missing",
            })?;
        crate::fs::mkdir(path, self.cwd_inode)
    }

    fn cmd_rmdir(&self, args: &[String]) -> crate::error::KernelResult<()> {
        let path = args
            .first()
            .ok_or(crate::error::KernelError::InvalidArgument {
                name: "path",
                value: "missing",
            })?;
        crate::fs::rmdir(path, self.cwd_inode)
    }

    fn cmd_rm(&self, args: &[String]) -> crate::error::KernelResult<()> {
        let path = args
            .first()
            .ok_or(crate::error::KernelError::InvalidArgument {
                name: "path",
                value: "missing",
            })?;
        crate::fs::unlink(path, self.cwd_inode)
    }

    /// Resolve `argv[0]` to an absolute canonical path, verify it exists,
    /// and spawn it as a new user task. The shell does not wait for it;
    /// the scheduler runs shell and child round-robin until the child
    /// finishes (§4.O describes this as "parent spins" in the fork model
    /// this folds into one step).
    fn run_external(&mut self, name: &str, argv: &[String]) {
        let cwd = match crate::fs::getcwd(self.cwd_inode) {
            Ok(c) => c,
            Err(e) => {
                crate::println!("{}: {:?}", name, e);
                return;
            }
        };
        let path = canonicalize(&cwd, name);
        if let Err(e) = crate::fs::stat(&path, self.cwd_inode) {
            crate::println!("{}: command not found ({:?})", name, e);
            return;
        }
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        if let Err(e) = crate::process::spawn(&path, &args, self.pid, self.cwd_inode) {
            crate::println!("{}: failed to launch ({:?})", name, e);
        }
    }
}

fn erase(buf: &mut String, count: usize) {
    for _ in 0..count {
        if buf.pop().is_none() {
            break;
        }
        console::putchar(0x08);
        console::putchar(b' ');
        console::putchar(0x08);
    }
}

fn state_name(state: crate::sched::task::TaskState) -> &'static str {
    use crate::sched::task::TaskState::*;
    match state {
        Running => "running",
        Ready => "ready",
        Blocked => "blocked",
        Waiting => "waiting",
        Hanging => "hanging",
        Died => "died",
    }
}

fn tokenize(line: &str) -> Vec<String> {
    line.split(' ')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Resolve `path` against `cwd` and collapse `.`/`..` components into an
/// absolute string, without touching the file system.
fn canonicalize(cwd: &str, path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    let mut combined = String::new();
    if !path.starts_with('/') {
        combined.push_str(cwd);
    }
    if !combined.ends_with('/') {
        combined.push('/');
    }
    combined.push_str(path);

    for part in combined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            p => stack.push(p),
        }
    }
    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    out
}
