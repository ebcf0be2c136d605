//! The fixed builtin table, a dispatch-by-name structure populated with the
//! language's own Malay names. `install` seeds a fresh global `Environment`;
//! every builtin surfaces failures as ordinary `Error::Runtime`s.

use std::cell::RefCell;
use std::io::Write as _;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::value::Value;

fn native(name: &'static str, f: impl Fn(&[Value], &crate::value::Caller) -> Result<Value> + 'static) -> Value {
    Value::NativeFunction(Rc::from(name), Rc::new(f))
}

fn arity_error(name: &str, expected: &str, got: usize) -> Error {
    Error::runtime(format!("'{}' menjangka {} argumen, dapat {}", name, expected, got), 0)
}

/// Installs every builtin into `env`, which must be the root/global scope.
pub fn install(env: &Rc<RefCell<Environment>>) {
    let out: Rc<RefCell<Box<dyn std::io::Write>>> = Rc::new(RefCell::new(Box::new(std::io::stdout())));
    install_cetak(env, out);

    Environment::define(env, "panjang", native("panjang", |args, _| {
        if args.len() != 1 {
            return Err(arity_error("panjang", "1", args.len()));
        }
        length_of(&args[0]).map(Value::int)
    }));

    Environment::define(env, "julat", native("julat", |args, _| {
        let (start, stop, step) = match args.len() {
            1 => (BigInt::zero(), to_bigint(&args[0])?, BigInt::from(1)),
            2 => (to_bigint(&args[0])?, to_bigint(&args[1])?, BigInt::from(1)),
            3 => (to_bigint(&args[0])?, to_bigint(&args[1])?, to_bigint(&args[2])?),
            n => return Err(arity_error("julat", "1-3", n)),
        };
        if step.is_zero() {
            return Err(Error::runtime("langkah julat tidak boleh sifar", 0));
        }
        let mut out = Vec::new();
        let mut cur = start;
        if step > BigInt::zero() {
            while cur < stop {
                out.push(Value::Int(cur.clone()));
                cur += &step;
            }
        } else {
            while cur > stop {
                out.push(Value::Int(cur.clone()));
                cur += &step;
            }
        }
        Ok(Value::list(out))
    }));

    Environment::define(env, "jenis", native("jenis", |args, _| {
        args.first().map(|v| Value::str(v.type_name())).ok_or_else(|| arity_error("jenis", "1", 0))
    }));

    Environment::define(env, "abs", native("abs", |args, _| match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(i.clone().abs())),
        Some(Value::Float(f)) => Ok(Value::Float(f.abs())),
        Some(other) => Err(Error::runtime(format!("operan bukan nombor: {}", other.type_name()), 0)),
        None => Err(arity_error("abs", "1", 0)),
    }));

    Environment::define(env, "maks", native("maks", |args, _| reduce_extreme(args, true)));
    Environment::define(env, "min", native("min", |args, _| reduce_extreme(args, false)));

    Environment::define(env, "jumlah", native("jumlah", |args, _| {
        let items = args.first().ok_or_else(|| arity_error("jumlah", "1", 0))?;
        let items = as_iterable(items)?;
        let mut total = Value::int(0);
        for item in items {
            total = crate::operators::apply_binop(&crate::ast::BinOp::Add, &total, &item, 0)?;
        }
        Ok(total)
    }));

    Environment::define(env, "punca", native("punca", |args, _| {
        let v = args.first().ok_or_else(|| arity_error("punca", "1", 0))?;
        Ok(Value::Float(to_f64(v)?.sqrt()))
    }));

    Environment::define(env, "kuasa", native("kuasa", |args, _| {
        if args.len() != 2 {
            return Err(arity_error("kuasa", "2", args.len()));
        }
        crate::operators::apply_binop(&crate::ast::BinOp::Pow, &args[0], &args[1], 0)
    }));

    Environment::define(env, "bulat", native("bulat", |args, _| match args.first() {
        Some(Value::Float(f)) => Ok(Value::Int(BigInt::from(f.round() as i64))),
        Some(Value::Int(i)) => Ok(Value::Int(i.clone())),
        Some(other) => Err(Error::runtime(format!("operan bukan nombor: {}", other.type_name()), 0)),
        None => Err(arity_error("bulat", "1", 0)),
    }));

    Environment::define(env, "disusun", native("disusun", |args, caller| {
        let items = args.first().ok_or_else(|| arity_error("disusun", "1", 0))?;
        let mut items = as_iterable(items)?;
        if let Some(key_fn) = args.get(1) {
            let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(items.len());
            for item in items {
                let key = caller(key_fn, std::slice::from_ref(&item))?;
                keyed.push((key, item));
            }
            keyed.sort_by(|a, b| compare_for_sort(&a.0, &b.0));
            items = keyed.into_iter().map(|(_, v)| v).collect();
        } else {
            items.sort_by(compare_for_sort);
        }
        Ok(Value::list(items))
    }));

    Environment::define(env, "terbalik", native("terbalik", |args, _| {
        let items = args.first().ok_or_else(|| arity_error("terbalik", "1", 0))?;
        let mut items = as_iterable(items)?;
        items.reverse();
        Ok(Value::list(items))
    }));

    Environment::define(env, "nombor_senarai", native("nombor_senarai", |args, _| {
        let items = args.first().ok_or_else(|| arity_error("nombor_senarai", "1", 0))?;
        let items = as_iterable(items)?;
        Ok(Value::list(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| Value::Tuple(Rc::new(vec![Value::int(i as i64), v])))
                .collect(),
        ))
    }));

    Environment::define(env, "cantum", native("cantum", |args, _| {
        let sep = match args.first() {
            Some(Value::Str(s)) => s.as_str().to_string(),
            Some(other) => return Err(Error::runtime(format!("pemisah bukan str: {}", other.type_name()), 0)),
            None => return Err(arity_error("cantum", "2", 0)),
        };
        let items = args.get(1).ok_or_else(|| arity_error("cantum", "2", 1))?;
        let items = as_iterable(items)?;
        let parts: Result<Vec<String>> = items
            .into_iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.as_str().to_string()),
                other => Err(Error::runtime(format!("elemen bukan str: {}", other.type_name()), 0)),
            })
            .collect();
        Ok(Value::str(parts?.join(&sep)))
    }));

    Environment::define(env, "peta", native("peta", |args, caller| {
        if args.len() != 2 {
            return Err(arity_error("peta", "2", args.len()));
        }
        let items = as_iterable(&args[1])?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(caller(&args[0], &[item])?);
        }
        Ok(Value::list(out))
    }));

    Environment::define(env, "tapis", native("tapis", |args, caller| {
        if args.len() != 2 {
            return Err(arity_error("tapis", "2", args.len()));
        }
        let items = as_iterable(&args[1])?;
        let mut out = Vec::new();
        for item in items {
            if caller(&args[0], &[item.clone()])?.is_truthy() {
                out.push(item);
            }
        }
        Ok(Value::list(out))
    }));

    Environment::define(env, "semua", native("semua", |args, _| {
        let items = as_iterable(args.first().ok_or_else(|| arity_error("semua", "1", 0))?)?;
        Ok(Value::Bool(items.iter().all(Value::is_truthy)))
    }));

    Environment::define(env, "mana", native("mana", |args, _| {
        let items = as_iterable(args.first().ok_or_else(|| arity_error("mana", "1", 0))?)?;
        Ok(Value::Bool(items.iter().any(Value::is_truthy)))
    }));

    for (name, ctor) in [
        ("int", to_int as fn(&Value) -> Result<Value>),
        ("nombor", to_int),
        ("float", to_float),
        ("perpuluhan", to_float),
        ("str", to_str),
        ("teks", to_str),
        ("bool", to_bool),
    ] {
        Environment::define(
            env,
            name,
            native(leak(name), move |args, _| ctor(args.first().ok_or_else(|| arity_error(name, "1", 0))?)),
        );
    }

    Environment::define(env, "list", native("list", |args, _| {
        Ok(Value::list(match args.first() {
            Some(v) => as_iterable(v)?,
            None => Vec::new(),
        }))
    }));

    Environment::define(env, "tuple", native("tuple", |args, _| {
        Ok(Value::Tuple(Rc::new(match args.first() {
            Some(v) => as_iterable(v)?,
            None => Vec::new(),
        })))
    }));

    Environment::define(env, "set", native("set", |args, _| {
        let mut out: Vec<Value> = Vec::new();
        if let Some(v) = args.first() {
            for item in as_iterable(v)? {
                if !out.iter().any(|x| x.kilat_eq(&item)) {
                    out.push(item);
                }
            }
        }
        Ok(Value::Set(Rc::new(RefCell::new(out))))
    }));

    Environment::define(env, "dict", native("dict", |args, _| match args.first() {
        Some(Value::Dict(d)) => Ok(Value::Dict(Rc::new(RefCell::new(d.borrow().clone())))),
        None => Ok(Value::Dict(Rc::new(RefCell::new(Vec::new())))),
        Some(other) => Err(Error::runtime(format!("tidak boleh tukar kepada dict: {}", other.type_name()), 0)),
    }));

    Environment::define(env, "aksara", native("aksara", |args, _| {
        let code = to_bigint(args.first().ok_or_else(|| arity_error("aksara", "1", 0))?)?;
        let code = code.to_u32().ok_or_else(|| Error::runtime("kod aksara tidak sah", 0))?;
        let ch = char::from_u32(code).ok_or_else(|| Error::runtime("kod aksara tidak sah", 0))?;
        Ok(Value::str(ch.to_string()))
    }));

    Environment::define(env, "kod", native("kod", |args, _| match args.first() {
        Some(Value::Str(s)) => s
            .chars()
            .next()
            .map(|c| Value::int(c as i64))
            .ok_or_else(|| Error::runtime("str kosong", 0)),
        Some(other) => Err(Error::runtime(format!("dijangka str, dapat {}", other.type_name()), 0)),
        None => Err(arity_error("kod", "1", 0)),
    }));

    Environment::define(env, "ada_atribut", native("ada_atribut", |args, _| {
        if args.len() != 2 {
            return Err(arity_error("ada_atribut", "2", args.len()));
        }
        let Value::Str(name) = &args[1] else {
            return Err(Error::runtime("nama atribut bukan str", 0));
        };
        Ok(Value::Bool(match &args[0] {
            Value::Instance(inst) => {
                let inst = inst.borrow();
                inst.get_attr(name).is_some() || inst.class.find_method(name).is_some() || inst.class.find_class_var(name).is_some()
            }
            Value::Class(c) => c.find_method(name).is_some() || c.find_class_var(name).is_some(),
            Value::Module(m) => m.attrs.borrow().iter().any(|(n, _)| n == name.as_str()),
            _ => false,
        }))
    }));

    Environment::define(env, "adalah_jenis", native("adalah_jenis", |args, _| {
        if args.len() != 2 {
            return Err(arity_error("adalah_jenis", "2", args.len()));
        }
        let Value::Str(name) = &args[1] else {
            return Err(Error::runtime("nama jenis bukan str", 0));
        };
        Ok(Value::Bool(match &args[0] {
            Value::Instance(inst) => inst.borrow().class.is_subclass_or_self(name),
            other => other.type_name() == name.as_str(),
        }))
    }));

    Environment::define(env, "buka", native("buka", |args, _| {
        let Some(Value::Str(path)) = args.first() else {
            return Err(arity_error("buka", "1", args.len()));
        };
        let mode = match args.get(1) {
            Some(Value::Str(m)) => m.as_str(),
            _ => "r",
        };
        if mode.starts_with('r') {
            let content = std::fs::read_to_string(path.as_str())?;
            Ok(Value::str(content))
        } else {
            Err(Error::runtime("mod fail tidak disokong selain 'r' dalam ujian terbina-dalam", 0))
        }
    }));

    Environment::define(env, "input", native("input", |args, _| {
        if let Some(Value::Str(prompt)) = args.first() {
            print!("{}", prompt);
            std::io::stdout().flush().ok();
        }
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Value::str(line))
    }));
}

fn install_cetak(env: &Rc<RefCell<Environment>>, sink: Rc<RefCell<Box<dyn std::io::Write>>>) {
    Environment::define(
        env,
        "cetak",
        native("cetak", move |args, _| {
            let line = args.iter().map(Value::display_str).collect::<Vec<_>>().join(" ");
            let mut sink = sink.borrow_mut();
            writeln!(sink, "{}", line)?;
            Ok(Value::None)
        }),
    );
}

/// Test-only hook: redirects `cetak` output into an in-memory buffer so unit
/// tests can assert on program output instead of capturing real stdout.
#[cfg(test)]
pub fn with_test_output(env: &Rc<RefCell<Environment>>, buffer: Rc<RefCell<String>>) {
    struct BufWriter(Rc<RefCell<String>>);
    impl std::io::Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().push_str(&String::from_utf8_lossy(buf));
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
    install_cetak(env, Rc::new(RefCell::new(Box::new(BufWriter(buffer)))));
}

pub fn import_module(name: &str, line: u32) -> Result<Value> {
    Err(Error::runtime(format!("modul tidak ditemui: {}", name), line))
}

fn leak(s: &str) -> &'static str {
    Box::leak(s.to_string().into_boxed_str())
}

fn length_of(v: &Value) -> Result<i64> {
    Ok(match v {
        Value::Str(s) => s.chars().count() as i64,
        Value::List(l) => l.borrow().len() as i64,
        Value::Tuple(t) => t.len() as i64,
        Value::Dict(d) => d.borrow().len() as i64,
        Value::Set(s) => s.borrow().len() as i64,
        other => return Err(Error::runtime(format!("tiada panjang untuk {}", other.type_name()), 0)),
    })
}

fn as_iterable(v: &Value) -> Result<Vec<Value>> {
    match v {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Set(items) => Ok(items.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(pairs) => Ok(pairs.borrow().iter().map(|(k, _)| k.clone()).collect()),
        other => Err(Error::runtime(format!("bukan boleh lelar: {}", other.type_name()), 0)),
    }
}

fn to_bigint(v: &Value) -> Result<BigInt> {
    match v {
        Value::Int(i) => Ok(i.clone()),
        Value::Bool(b) => Ok(BigInt::from(*b as i64)),
        Value::Float(f) => Ok(BigInt::from(*f as i64)),
        other => Err(Error::runtime(format!("dijangka nombor, dapat {}", other.type_name()), 0)),
    }
}

fn to_f64(v: &Value) -> Result<f64> {
    match v {
        Value::Int(i) => i.to_f64().ok_or_else(|| Error::runtime("integer terlalu besar", 0)),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(Error::runtime(format!("dijangka nombor, dapat {}", other.type_name()), 0)),
    }
}

fn compare_for_sort(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => to_f64(a).unwrap_or(0.0).partial_cmp(&to_f64(b).unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal),
    }
}

fn reduce_extreme(args: &[Value], want_max: bool) -> Result<Value> {
    let items: Vec<Value> = if args.len() == 1 {
        as_iterable(&args[0])?
    } else {
        args.to_vec()
    };
    let mut iter = items.into_iter();
    let mut best = iter.next().ok_or_else(|| Error::runtime("urutan kosong", 0))?;
    for item in iter {
        let better = if want_max {
            compare_for_sort(&item, &best) == std::cmp::Ordering::Greater
        } else {
            compare_for_sort(&item, &best) == std::cmp::Ordering::Less
        };
        if better {
            best = item;
        }
    }
    Ok(best)
}

fn to_int(v: &Value) -> Result<Value> {
    Ok(match v {
        Value::Int(i) => Value::Int(i.clone()),
        Value::Float(f) => Value::Int(BigInt::from(*f as i64)),
        Value::Bool(b) => Value::int(*b as i64),
        Value::Str(s) => Value::Int(
            s.trim().parse::<BigInt>().map_err(|_| Error::runtime(format!("tidak boleh tukar '{}' kepada int", s), 0))?,
        ),
        other => return Err(Error::runtime(format!("tidak boleh tukar kepada int: {}", other.type_name()), 0)),
    })
}

fn to_float(v: &Value) -> Result<Value> {
    Ok(Value::Float(match v {
        Value::Int(i) => i.to_f64().ok_or_else(|| Error::runtime("integer terlalu besar", 0))?,
        Value::Float(f) => *f,
        Value::Bool(b) => if *b { 1.0 } else { 0.0 },
        Value::Str(s) => s.trim().parse().map_err(|_| Error::runtime(format!("tidak boleh tukar '{}' kepada float", s), 0))?,
        other => return Err(Error::runtime(format!("tidak boleh tukar kepada float: {}", other.type_name()), 0)),
    }))
}

fn to_str(v: &Value) -> Result<Value> {
    Ok(Value::str(v.display_str()))
}

fn to_bool(v: &Value) -> Result<Value> {
    Ok(Value::Bool(v.is_truthy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn julat_materialises_a_range() {
        let env = Environment::new(None);
        install(&env);
        let julat = Environment::get(&env, "julat", 1).unwrap();
        let Value::NativeFunction(_, f) = julat else { panic!() };
        let caller = |_: &Value, _: &[Value]| -> Result<Value> { unreachable!() };
        let Value::List(items) = f(&[Value::int(4)], &caller).unwrap() else { panic!() };
        assert_eq!(items.borrow().len(), 4);
    }

    #[test]
    fn panjang_counts_chars() {
        let env = Environment::new(None);
        install(&env);
        let panjang = Environment::get(&env, "panjang", 1).unwrap();
        let Value::NativeFunction(_, f) = panjang else { panic!() };
        let caller = |_: &Value, _: &[Value]| -> Result<Value> { unreachable!() };
        assert!(matches!(f(&[Value::str("salam")], &caller).unwrap(), Value::Int(_)));
    }
}
