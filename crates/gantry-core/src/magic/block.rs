//! Block directive handlers (`%%name args` + body).

use super::line::run_command;
use super::literal::{indent, is_identifier, python_literal};
use super::{BlockHandler, Rewrite};

pub(super) const HANDLERS: &[(&str, BlockHandler)] = &[
    ("timeit", timeit),
    ("time", time),
    ("writefile", writefile),
    ("bash", bash),
    ("html", html),
    ("javascript", javascript),
    ("latex", latex),
    ("markdown", markdown),
    ("capture", capture),
];

const TIMEIT_LOOPS: u32 = 100;

fn timeit(_args: &str, body: &str) -> Rewrite {
    Rewrite::code(format!(
        "import timeit\n\
         \n\
         def _gantry_timed_block():\n\
         {body}\n\
         \n\
         _gantry_elapsed = timeit.timeit(_gantry_timed_block, number={n})\n\
         print('{n} loops: %.6fs total, %.3fms per loop' % (_gantry_elapsed, _gantry_elapsed / {n} * 1000))",
        body = indent(body, "    "),
        n = TIMEIT_LOOPS,
    ))
}

fn time(_args: &str, body: &str) -> Rewrite {
    Rewrite::code(format!(
        "import time as _gantry_time\n\
         _gantry_start = _gantry_time.perf_counter()\n\
         {body}\n\
         print('\\nWall time: %.2fms' % ((_gantry_time.perf_counter() - _gantry_start) * 1000))"
    ))
}

fn writefile(args: &str, body: &str) -> Rewrite {
    if args.is_empty() {
        return Rewrite::error("%%writefile requires a filename");
    }
    let path = python_literal(args);
    Rewrite::code(format!(
        "_gantry_body = {body}\n\
         with open({path}, 'w') as _gantry_file:\n    \
         _gantry_file.write(_gantry_body)\n\
         print('Writing %d bytes to %s' % (len(_gantry_body), {path}))",
        body = python_literal(body),
    ))
}

fn bash(_args: &str, body: &str) -> Rewrite {
    let argv = format!("['bash', '-c', {}]", python_literal(body));
    Rewrite::code(run_command(&argv))
}

fn display(kind: &str, body: &str) -> Rewrite {
    Rewrite::code(format!(
        "from IPython.display import {kind}, display\ndisplay({kind}({}))",
        python_literal(body)
    ))
}

fn html(_args: &str, body: &str) -> Rewrite {
    display("HTML", body)
}

fn javascript(_args: &str, body: &str) -> Rewrite {
    display("Javascript", body)
}

fn latex(_args: &str, body: &str) -> Rewrite {
    display("Latex", body)
}

fn markdown(_args: &str, body: &str) -> Rewrite {
    display("Markdown", body)
}

fn capture(args: &str, body: &str) -> Rewrite {
    let name = if args.is_empty() { "captured" } else { args };
    if !is_identifier(name) {
        return Rewrite::error(format!("%%capture: '{name}' is not a valid variable name"));
    }
    Rewrite::code(format!(
        "from IPython.utils.capture import capture_output\n\
         with capture_output() as {name}:\n\
         {body}\n\
         print({message})",
        body = indent(body, "    "),
        message = python_literal(&format!("Output captured to '{name}'")),
    ))
}
