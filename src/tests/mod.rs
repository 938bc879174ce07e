mod errors;
mod lang;

use crate::{BasicError, Config, Error, ExitStatus, Host, HostResult, Interpreter, Program};
use std::collections::{HashMap, VecDeque};

/// A scripted host: output is collected, input and library sources are
/// provided up front, `OSCLI` is recorded, the clock stands at a fixed
/// tick.
pub(crate) struct TestHost {
    pub output: String,
    pub input: VecDeque<String>,
    pub commands: Vec<String>,
    pub command_output: Vec<String>,
    pub libraries: HashMap<String, String>,
    pub waits: Vec<u32>,
    pub escape_after: Option<u32>,
}

impl TestHost {
    pub fn new() -> TestHost {
        TestHost {
            output: String::new(),
            input: VecDeque::new(),
            commands: Vec::new(),
            command_output: Vec::new(),
            libraries: HashMap::new(),
            waits: Vec::new(),
            escape_after: None,
        }
    }

    pub fn with_input(lines: &[&str]) -> TestHost {
        let mut host = TestHost::new();
        host.input = lines.iter().map(|line| line.to_string()).collect();
        host
    }

    fn unavailable(what: &str) -> Box<dyn crate::HostError> {
        Box::new(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            what.to_string(),
        ))
    }
}

impl Host for TestHost {
    fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn read_line(&mut self, out: &mut String) -> HostResult<()> {
        match self.input.pop_front() {
            Some(line) => {
                out.push_str(&line);
                Ok(())
            }
            None => Err(Self::unavailable("input exhausted")),
        }
    }

    fn poll_escape(&mut self) -> bool {
        match self.escape_after.as_mut() {
            Some(0) => true,
            Some(count) => {
                *count -= 1;
                false
            }
            None => false,
        }
    }

    fn oscli(&mut self, command: &str, capture: Option<&mut Vec<String>>) -> HostResult<()> {
        self.commands.push(command.to_string());
        if let Some(lines) = capture {
            lines.extend(self.command_output.iter().cloned());
        }
        Ok(())
    }

    fn ticks(&self) -> i64 {
        1234
    }

    fn wait(&mut self, centiseconds: u32) {
        self.waits.push(centiseconds);
    }

    fn load_library(&mut self, name: &str) -> HostResult<String> {
        self.libraries
            .get(name)
            .cloned()
            .ok_or_else(|| Self::unavailable(name))
    }
}

/// Runs a program against a fresh scripted host and returns what it
/// printed; panics on any error.
pub(crate) fn run_ok(source: &str) -> String {
    let mut host = TestHost::new();
    let program = Program::compile(source).expect("program should tokenize");
    let mut interp = Interpreter::new(program, Config::default()).unwrap();
    match interp.run(&mut host) {
        Ok(_) => host.output,
        Err(error) => panic!("program failed: {}\noutput so far: {}", error, host.output),
    }
}

/// Runs a program expecting it to fail; returns the untrapped error.
pub(crate) fn run_err(source: &str) -> BasicError {
    let mut host = TestHost::new();
    let program = Program::compile(source).expect("program should tokenize");
    let mut interp = Interpreter::new(program, Config::default()).unwrap();
    match interp.run(&mut host) {
        Ok(status) => panic!("expected an error, program exited with {:?}", status),
        Err(Error::Basic(error)) => error,
        Err(other) => panic!("unexpected error kind: {}", other),
    }
}

/// Runs a program with a caller-provided host.
pub(crate) fn run_with(source: &str, host: &mut TestHost) -> Result<ExitStatus, Error> {
    let program = Program::compile(source)?;
    let mut interp = Interpreter::new(program, Config::default())?;
    interp.run(host)
}

fn assert_send<T: Send>() {}
fn assert_sync<T: Sync>() {}
fn assert_std_err_impl<T: std::error::Error>() {}

#[test]
fn assert_error_properties() {
    assert_send::<Error>();
    assert_sync::<Error>();
    assert_std_err_impl::<Error>();
}

#[test]
fn exit_status_codes() {
    let mut host = TestHost::new();
    assert_eq!(
        run_with("10 QUIT 3", &mut host).unwrap(),
        ExitStatus::Quit(3)
    );
    assert_eq!(ExitStatus::Quit(3).code(), 3);
    assert_eq!(
        run_with("10 STOP", &mut host).unwrap(),
        ExitStatus::Stopped(10)
    );
    assert_eq!(ExitStatus::Stopped(10).code(), 0);
    assert_eq!(run_with("10 END", &mut host).unwrap(), ExitStatus::Ended);
    assert_eq!(run_with("10 A%=1", &mut host).unwrap(), ExitStatus::Ended);
}

#[test]
fn stack_is_balanced_after_structured_code() {
    let source = "\
10 FOR I%=1 TO 3
20 WHILE I%=99
30 ENDWHILE
40 REPEAT
50 UNTIL TRUE
60 NEXT
70 GOSUB 100
80 PROCp(1)
90 END
100 RETURN
110 DEF PROCp(x%)
120 LOCAL y%
130 y%=x%
140 ENDPROC";
    let program = Program::compile(source).unwrap();
    let mut interp = Interpreter::new(program, Config::default()).unwrap();
    let mut host = TestHost::new();
    interp.run(&mut host).unwrap();
    assert_eq!(interp.stack.len(), 0);
}

#[test]
fn wait_and_time_go_through_the_host() {
    let mut host = TestHost::new();
    let program = Program::compile("10 WAIT 5:PRINT TIME").unwrap();
    let mut interp = Interpreter::new(program, Config::default()).unwrap();
    interp.run(&mut host).unwrap();
    assert_eq!(host.waits, vec![5]);
    assert_eq!(host.output, "1234\n");
}

#[test]
fn oscli_capture_fills_a_string_array() {
    let mut host = TestHost::new();
    host.command_output = vec!["alpha".into(), "beta".into()];
    let source = "\
10 DIM out$(4)
20 OSCLI \"list files\" TO out$()
30 PRINT out$(0);out$(1)";
    let program = Program::compile(source).unwrap();
    let mut interp = Interpreter::new(program, Config::default()).unwrap();
    interp.run(&mut host).unwrap();
    assert_eq!(host.commands, vec!["list files".to_string()]);
    assert_eq!(host.output, "alphabeta\n");
}

#[test]
fn star_commands_invoke_oscli() {
    let mut host = TestHost::new();
    run_with("10 *CAT", &mut host).unwrap();
    assert_eq!(host.commands, vec!["CAT".to_string()]);
}

#[test]
fn libraries_load_through_the_host() {
    let mut host = TestHost::new();
    host.libraries.insert(
        "greet".into(),
        "10 DEF PROCgreet\n20 PRINT \"lib\"\n30 ENDPROC".into(),
    );
    let source = "\
10 LIBRARY \"greet\"
20 PROCgreet
30 END";
    run_with(source, &mut host).unwrap();
    assert_eq!(host.output, "lib\n");
}

#[test]
fn install_library_makes_definitions_callable() {
    let program = Program::compile("10 PROChello\n20 END").unwrap();
    let mut interp = Interpreter::new(program, Config::default()).unwrap();
    interp
        .install_library("10 DEF PROChello\n20 PRINT \"from lib\"\n30 ENDPROC")
        .unwrap();
    let mut host = TestHost::new();
    interp.run(&mut host).unwrap();
    assert_eq!(host.output, "from lib\n");
}

#[test]
fn library_locals_shadow_main_variables() {
    let program =
        Program::compile("10 counter%=99\n20 PROCbump:PROCbump\n30 PRINT counter%").unwrap();
    let mut interp = Interpreter::new(program, Config::default()).unwrap();
    interp
        .install_library(
            "10 LIBRARY LOCAL counter%\n20 DEF PROCbump\n30 counter%+=1:PRINT counter%;\n40 ENDPROC",
        )
        .unwrap();
    let mut host = TestHost::new();
    interp.run(&mut host).unwrap();
    assert_eq!(host.output, "1299\n");
}
