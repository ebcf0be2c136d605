//! Integration tests driving the full pipeline through [`Sandbox`], on both
//! backends, matching the reference `--native`/`--bytecode` agreement
//! property from `spec.md` §8: each scenario below is checked on both so a
//! divergence between the tree interpreter and the VM surfaces immediately.

use kilat::{Backend, Sandbox};

fn run_both(src: &str) -> (String, String) {
    let mut native = Sandbox::with_backend(Backend::Native);
    let mut bytecode = Sandbox::with_backend(Backend::Bytecode);
    let n = native.run(src).expect("native run failed").repr_str();
    let b = bytecode.run(src).expect("bytecode run failed").repr_str();
    (n, b)
}

#[test]
fn basic_arithmetic_agrees_on_both_backends() {
    for (src, expected) in [
        ("2 + 2", "4"),
        ("10 - 3", "7"),
        ("4 * 5", "20"),
        ("10 / 4", "2.5"),
        ("10 // 3", "3"),
        ("10 % 3", "1"),
        ("2 ** 8", "256"),
        ("2 + 3 * 4", "14"),
        ("(2 + 3) * 4", "20"),
    ] {
        let (n, b) = run_both(src);
        assert_eq!(n, expected, "native mismatch for {}", src);
        assert_eq!(b, expected, "bytecode mismatch for {}", src);
    }
}

#[test]
fn variables_persist_within_a_single_run() {
    let (n, b) = run_both("x = 10\ny = 20\nx + y\n");
    assert_eq!(n, "30");
    assert_eq!(b, "30");
}

#[test]
fn strings_and_lists() {
    let (n, b) = run_both("'sel' + 'amat'\n");
    assert_eq!(n, "'selamat'");
    assert_eq!(b, "'selamat'");

    let (n, b) = run_both("[1, 2, 3]\n");
    assert_eq!(n, "[1, 2, 3]");
    assert_eq!(b, "[1, 2, 3]");
}

#[test]
fn list_indexing_and_slicing() {
    let (n, b) = run_both("nums = [10, 20, 30, 40]\nnums[1]\n");
    assert_eq!(n, "20");
    assert_eq!(b, "20");

    let (n, b) = run_both("nums = [10, 20, 30, 40]\nnums[1:3]\n");
    assert_eq!(n, "[20, 30]");
    assert_eq!(b, "[20, 30]");

    let (n, b) = run_both("nums = [10, 20, 30, 40]\nnums[-1]\n");
    assert_eq!(n, "40");
    assert_eq!(b, "40");
}

#[test]
fn dicts_and_membership() {
    let (n, b) = run_both("d = {\"a\": 1, \"b\": 2}\nd[\"a\"]\n");
    assert_eq!(n, "1");
    assert_eq!(b, "1");

    let (n, b) = run_both("\"a\" dalam {\"a\": 1}\n");
    assert_eq!(n, "benar");
    assert_eq!(b, "benar");
}

#[test]
fn if_elif_else_chain() {
    let src = "fungsi klasifikasi(n):\n    jika n < 0:\n        kembali \"negatif\"\n    ataujika n == 0:\n        kembali \"sifar\"\n    atau:\n        kembali \"positif\"\nklasifikasi(-5)\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "'negatif'");
    assert_eq!(b, "'negatif'");
}

#[test]
fn while_with_break_and_continue() {
    let src = "n = 0\ntotal = 0\nselagi benar:\n    n = n + 1\n    jika n > 5:\n        berhenti\n    jika n % 2 == 0:\n        teruskan\n    total = total + n\ntotal\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "9");
    assert_eq!(b, "9");
}

#[test]
fn for_in_over_range() {
    let src = "total = 0\nuntuk diulang i dalam julat(5):\n    total = total + i\ntotal\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "10");
    assert_eq!(b, "10");
}

#[test]
fn function_defaults_varargs_kwargs() {
    let src = "fungsi f(a, b=10, *args, **kwargs):\n    kembali a + b + panjang(args) + panjang(kwargs)\nf(1, 2, 3, 4, x=5, y=6)\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "7");
    assert_eq!(b, "7");
}

#[test]
fn closures_observe_later_mutation() {
    let src = "fungsi pembuat():\n    n = 0\n    fungsi naik():\n        nonlokal n\n        n = n + 1\n        kembali n\n    kembali naik\nf = pembuat()\nf()\nf()\nhasil = f()\nhasil\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "3");
    assert_eq!(b, "3");
}

#[test]
fn classes_single_inheritance_and_attrs() {
    let src = "kelas Haiwan:\n    bunyi = \"...\"\n    fungsi __init__(diri, nama):\n        diri.nama = nama\n    fungsi cakap(diri):\n        kembali diri.nama + \" kata \" + diri.bunyi\nkelas Kucing(Haiwan):\n    bunyi = \"meow\"\nk = Kucing(\"Comel\")\nk.cakap()\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "'Comel kata meow'");
    assert_eq!(b, "'Comel kata meow'");
}

#[test]
fn try_except_finally_and_raise() {
    let src = "hasil = []\ncuba:\n    bangkit \"gagal\"\ntangkap sebagai e:\n    hasil = hasil + [\"tangkap: \" + e]\nakhirnya:\n    hasil = hasil + [\"selesai\"]\nhasil\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "['tangkap: gagal', 'selesai']");
    assert_eq!(b, "['tangkap: gagal', 'selesai']");
}

#[test]
fn bare_except_catches_builtin_exception() {
    let src = "status = \"\"\ncuba:\n    x = [1, 2, 3]\n    x[10]\ntangkap:\n    status = \"ditangkap\"\nstatus\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "'ditangkap'");
    assert_eq!(b, "'ditangkap'");
}

#[test]
fn list_comprehension() {
    let src = "[n * n untuk diulang n dalam julat(5) jika n % 2 == 0]\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "[0, 4, 16]");
    assert_eq!(b, "[0, 4, 16]");
}

#[test]
fn recursion() {
    let src = "fungsi fak(n):\n    jika n <= 1:\n        kembali 1\n    kembali n * fak(n - 1)\nfak(10)\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "3628800");
    assert_eq!(b, "3628800");
}

#[test]
fn bignum_arithmetic_beyond_i64() {
    let src = "2 ** 100\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "1267650600228229401496703205376");
    assert_eq!(b, "1267650600228229401496703205376");
}

#[test]
fn truthiness_rules() {
    for (src, expected) in [
        ("bukan benar", "salah"),
        ("bukan 0", "benar"),
        ("bukan \"\"", "benar"),
        ("bukan []", "benar"),
        ("bukan [0]", "salah"),
    ] {
        let (n, b) = run_both(src);
        assert_eq!(n, expected, "native mismatch for {}", src);
        assert_eq!(b, expected, "bytecode mismatch for {}", src);
    }
}

#[test]
fn sandbox_globals_persist_across_calls() {
    let mut sandbox = Sandbox::new();
    sandbox.run("counter = 0\n").unwrap();
    sandbox.run("counter = counter + 1\n").unwrap();
    let result = sandbox.run("counter\n").unwrap();
    assert_eq!(result.repr_str(), "1");
}

#[test]
fn decorators_apply_innermost_first() {
    let src = "hasil = []\nfungsi catat(nama):\n    fungsi hias(f):\n        fungsi dibalut(*args):\n            global hasil\n            hasil = hasil + [nama]\n            kembali f(*args)\n        kembali dibalut\n    kembali hias\n\n@catat(\"luar\")\n@catat(\"dalam\")\nfungsi target():\n    kembali \"ok\"\n\ntarget()\nhasil\n";
    let (n, b) = run_both(src);
    assert_eq!(n, "['luar', 'dalam']");
    assert_eq!(b, "['luar', 'dalam']");
}
