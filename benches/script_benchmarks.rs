use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ridge::Context;

fn run(c: &mut Criterion, name: &str, code: &str) {
    c.bench_function(name, |b| {
        b.iter(|| {
            let mut ctx = Context::new();
            black_box(ctx.eval(code).unwrap())
        })
    });
}

fn bench_fib(c: &mut Criterion) {
    let code = r#"
        function fib(n) {
            if (n <= 1) return n;
            var a = 0;
            var b = 1;
            for (var i = 2; i <= n; i = i + 1) {
                var c = a + b;
                a = b;
                b = c;
            }
            return b;
        }
        var sum = 0;
        for (var k = 0; k < 1000; k = k + 1) {
            sum = sum + fib(30);
        }
        sum;
    "#;
    run(c, "fib_iter 1k", code);
}

fn bench_loop(c: &mut Criterion) {
    let code = r#"
        var sum = 0;
        for (var i = 0; i < 10000; i++) {
            sum += i;
        }
        sum;
    "#;
    run(c, "loop 10k", code);
}

fn bench_array_push(c: &mut Criterion) {
    let code = r#"
        var arr = [];
        for (var i = 0; i < 10000; i = i + 1) {
            arr.push(i);
        }
        arr.length;
    "#;
    run(c, "array push 10k", code);
}

fn bench_object_create(c: &mut Criterion) {
    let code = r#"
        function Point(x, y) {
            this.x = x;
            this.y = y;
        }
        var points = [];
        for (var i = 0; i < 1000; i = i + 1) {
            points.push(new Point(i, i * 2));
        }
        points.length;
    "#;
    run(c, "object create 1k", code);
}

fn bench_string_concat(c: &mut Criterion) {
    let code = r#"
        var s = "";
        for (var i = 0; i < 1000; i = i + 1) {
            s = s + "x";
        }
        s.length;
    "#;
    run(c, "string concat 1k", code);
}

fn bench_sieve(c: &mut Criterion) {
    let code = r#"
        function sieve(n) {
            var primes = [];
            for (var i = 0; i <= n; i = i + 1) {
                primes.push(true);
            }
            primes[0] = false;
            primes[1] = false;
            for (var i = 2; i * i <= n; i = i + 1) {
                if (primes[i]) {
                    for (var j = i * i; j <= n; j = j + i) {
                        primes[j] = false;
                    }
                }
            }
            var count = 0;
            for (var i = 0; i <= n; i = i + 1) {
                if (primes[i]) count = count + 1;
            }
            return count;
        }
        sieve(10000);
    "#;
    run(c, "sieve 10k", code);
}

fn bench_recursion(c: &mut Criterion) {
    let code = r#"
        function sum(n) {
            if (n <= 0) return 0;
            return n + sum(n - 1);
        }
        var total = 0;
        for (var i = 0; i < 100; i = i + 1) {
            total = total + sum(100);
        }
        total;
    "#;
    run(c, "recursion 100x100", code);
}

fn bench_compile(c: &mut Criterion) {
    let code = r#"
        function f(a, b) {
            var t = a * 2 + b;
            if (t > 10) { t = t - 10; } else { t = t + 1; }
            while (t < 100) { t = t * 2; }
            return t;
        }
        var r = [];
        for (var i = 0; i < 10; i++) { r.push(f(i, i + 1)); }
    "#;
    c.bench_function("compile", |b| {
        let mut ctx = Context::new();
        b.iter(|| black_box(ctx.compile(code).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_fib,
    bench_loop,
    bench_array_push,
    bench_object_create,
    bench_string_concat,
    bench_sieve,
    bench_recursion,
    bench_compile,
);
criterion_main!(benches);
