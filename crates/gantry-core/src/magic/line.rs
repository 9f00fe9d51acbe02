//! Line directive handlers (`%name args`).

use super::literal::{is_identifier, python_literal};
use super::{LineHandler, MagicNotice, Rewrite};

pub(super) const HANDLERS: &[(&str, LineHandler)] = &[
    ("pip", pip),
    ("conda", conda),
    ("matplotlib", matplotlib),
    ("timeit", timeit),
    ("time", time),
    ("pwd", pwd),
    ("cd", cd),
    ("ls", ls),
    ("env", env),
    ("who", who),
    ("whos", whos),
    ("reset", reset),
    ("clear", clear),
    ("history", history),
    ("load", load),
    ("run", run),
    ("store", store),
    ("recall", recall),
    ("xdel", xdel),
];

const TIMEIT_LOOPS: u32 = 1000;

/// Run an argv list (a Python list expression) and echo its output.
pub(super) fn run_command(argv: &str) -> String {
    format!(
        "import subprocess\n\
         _gantry_proc = subprocess.run({argv}, capture_output=True, text=True)\n\
         print(_gantry_proc.stdout)\n\
         if _gantry_proc.stderr:\n    print(_gantry_proc.stderr)"
    )
}

fn literal_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.map(python_literal).collect::<Vec<_>>().join(", ")
}

fn pip(args: &str) -> Rewrite {
    let argv = format!(
        "[sys.executable, '-m', 'pip', {}]",
        literal_list(args.split_whitespace())
    );
    Rewrite::code(format!("import sys\n{}", run_command(&argv)))
}

fn conda(args: &str) -> Rewrite {
    let argv = format!("['conda', {}]", literal_list(args.split_whitespace()));
    Rewrite::code(run_command(&argv))
}

fn matplotlib(args: &str) -> Rewrite {
    let backend = python_literal(if args.is_empty() { "inline" } else { args });
    Rewrite::code(format!(
        "import matplotlib\n\
         matplotlib.use('agg')\n\
         import matplotlib.pyplot as plt\n\
         plt.switch_backend('agg')\n\
         get_ipython().run_line_magic('matplotlib', {backend})\n\
         print('Matplotlib backend set to: ' + {backend})"
    ))
}

fn timeit(args: &str) -> Rewrite {
    if args.is_empty() {
        return Rewrite::error("%timeit requires a statement");
    }
    Rewrite::code(format!(
        "import timeit\n\
         _gantry_elapsed = timeit.timeit({stmt}, globals=globals(), number={n})\n\
         print('{n} loops: %.6fs total, %.3fms per loop' % (_gantry_elapsed, _gantry_elapsed / {n} * 1000))",
        stmt = python_literal(args),
        n = TIMEIT_LOOPS,
    ))
}

fn time(args: &str) -> Rewrite {
    if args.is_empty() {
        return Rewrite::error("%time requires a statement");
    }
    Rewrite::code(format!(
        "import time as _gantry_time\n\
         _gantry_start = _gantry_time.perf_counter()\n\
         {args}\n\
         print('Wall time: %.2fms' % ((_gantry_time.perf_counter() - _gantry_start) * 1000))"
    ))
}

fn pwd(_args: &str) -> Rewrite {
    Rewrite::code("import os\nprint(os.getcwd())")
}

fn cd(args: &str) -> Rewrite {
    let path = python_literal(if args.is_empty() { "~" } else { args });
    Rewrite::code(format!(
        "import os\nos.chdir(os.path.expanduser({path}))\nprint(os.getcwd())"
    ))
}

fn ls(args: &str) -> Rewrite {
    let path = python_literal(if args.is_empty() { "." } else { args });
    Rewrite::code(format!(
        "import os\nfor _gantry_name in sorted(os.listdir({path})):\n    print(_gantry_name)"
    ))
}

fn env(args: &str) -> Rewrite {
    if let Some((name, value)) = args.split_once('=') {
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            return Rewrite::error("%env requires a variable name before '='");
        }
        return Rewrite::code(format!(
            "import os\nos.environ[{}] = {}\nprint({})",
            python_literal(name),
            python_literal(value),
            python_literal(&format!("{name}={value}")),
        ));
    }

    if !args.is_empty() {
        return Rewrite::code(format!(
            "import os\nprint(os.environ.get({}, 'Not set'))",
            python_literal(args)
        ));
    }

    Rewrite::code(
        "import os\n\
         for _gantry_key, _gantry_value in sorted(os.environ.items()):\n    \
         print('%s=%s' % (_gantry_key, _gantry_value))",
    )
}

fn who(_args: &str) -> Rewrite {
    Rewrite::code("print(' '.join(sorted(n for n in dir() if not n.startswith('_'))))")
}

const WHOS: &str = "\
print('%-20s %-15s %s' % ('Variable', 'Type', 'Data/Info'))
print('-' * 75)
for _gantry_name, _gantry_value in sorted(globals().items(), key=lambda item: item[0]):
    if _gantry_name.startswith('_'):
        continue
    try:
        if hasattr(_gantry_value, 'shape'):
            _gantry_info = str(_gantry_value.shape)
        elif hasattr(_gantry_value, '__len__'):
            _gantry_info = 'len=%d' % len(_gantry_value)
        else:
            _gantry_info = str(_gantry_value)[:40]
        print('%-20s %-15s %s' % (_gantry_name, type(_gantry_value).__name__, _gantry_info))
    except Exception:
        pass";

fn whos(_args: &str) -> Rewrite {
    Rewrite::code(WHOS)
}

fn reset(_args: &str) -> Rewrite {
    Rewrite::code("get_ipython().reset()\nprint('Namespace reset.')")
}

fn clear(_args: &str) -> Rewrite {
    Rewrite::code("from IPython.display import clear_output\nclear_output()")
}

fn history(_args: &str) -> Rewrite {
    Rewrite::code(
        "for _gantry_entry in get_ipython().history_manager.get_range():\n    \
         print('%4s: %s' % (_gantry_entry[1], _gantry_entry[2]))",
    )
}

fn load(args: &str) -> Rewrite {
    if args.is_empty() {
        return Rewrite::error("%load requires a filename");
    }
    Rewrite::code(format!(
        "with open({}, 'r') as _gantry_file:\n    print(_gantry_file.read())",
        python_literal(args)
    ))
}

fn run(args: &str) -> Rewrite {
    if args.is_empty() {
        return Rewrite::error("%run requires a filename");
    }
    Rewrite::code(format!(
        "with open({}) as _gantry_file:\n    exec(_gantry_file.read(), globals())",
        python_literal(args)
    ))
}

fn store(args: &str) -> Rewrite {
    not_implemented("store", args)
}

fn recall(args: &str) -> Rewrite {
    not_implemented("recall", args)
}

fn not_implemented(name: &str, args: &str) -> Rewrite {
    let directive = if args.is_empty() {
        format!("%{name}")
    } else {
        format!("%{name} {args}")
    };
    Rewrite::code(format!("# {directive} - not implemented in this kernel"))
        .with_notice(MagicNotice::info(format!("%{name} is not implemented in this kernel")))
}

fn xdel(args: &str) -> Rewrite {
    if args.is_empty() {
        return Rewrite::error("%xdel requires a variable name");
    }
    if !is_identifier(args) {
        return Rewrite::error(format!("%xdel: '{args}' is not a valid variable name"));
    }
    Rewrite::code(format!(
        "del {args}\nprint({})",
        python_literal(&format!("Deleted: {args}"))
    ))
}
