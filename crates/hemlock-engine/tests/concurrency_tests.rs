//! Concurrency runtime tests: tasks, channels, argument isolation.

use hemlock_engine::vm::{Interp, ModuleCache, OutputSink, SharedState, Value, VmError};

fn run(source: &str) -> (Result<Value, VmError>, String) {
    let output = OutputSink::buffer();
    let shared = SharedState::new(ModuleCache::new(None), output.clone(), vec![]);
    let mut interp = Interp::new(shared);
    let result = interp.run_source(source);
    (result, output.contents().unwrap())
}

fn run_output(source: &str) -> String {
    let (result, output) = run(source);
    result.expect("program failed");
    output
}

#[test]
fn test_parallel_sum_via_spawn_join() {
    let output = run_output(
        "async fn compute(n) { let s=0; let i=0; while (i<n) { s=s+i; i=i+1; } return s; }\n\
         let t1=spawn(compute, 10); let t2=spawn(compute, 5);\n\
         print(join(t1) + join(t2));",
    );
    assert_eq!(output, "55\n");
}

#[test]
fn test_channel_producer_consumer() {
    let output = run_output(
        "async fn prod(ch){ let i=0; while(i<5){ ch.send(i*10); i=i+1;} ch.close(); return null;}\n\
         async fn cons(ch){ let s=0; let v=ch.recv(); while(v!=null){ s=s+v; v=ch.recv();} return s;}\n\
         let ch=channel(10); let p=spawn(prod,ch); let c=spawn(cons,ch); join(p);\n\
         print(join(c));",
    );
    assert_eq!(output, "100\n");
}

#[test]
fn test_spawn_argument_isolation() {
    let output = run_output(
        "async fn mut(a){ a.push(99); return a.length; }\n\
         let orig=[1,2,3]; let t=spawn(mut, orig); let n=join(t);\n\
         print(orig.length); print(n);",
    );
    assert_eq!(output, "3\n4\n");
}

#[test]
fn test_channel_fifo_single_pair() {
    let output = run_output(
        "async fn prod(ch) { let i = 0; while (i < 20) { ch.send(i); i = i + 1; } ch.close(); return null; }\n\
         async fn cons(ch) {\n\
           let out = [];\n\
           let v = ch.recv();\n\
           while (v != null) { out.push(v); v = ch.recv(); }\n\
           return out;\n\
         }\n\
         let ch = channel(3);\n\
         let p = spawn(prod, ch); let c = spawn(cons, ch);\n\
         join(p);\n\
         let received = join(c);\n\
         let ordered = true;\n\
         for (v, i in received) { if (v != i) { ordered = false; } }\n\
         print(received.length); print(ordered);",
    );
    assert_eq!(output, "20\ntrue\n");
}

#[test]
fn test_task_exception_rethrown_on_join() {
    let output = run_output(
        "async fn fail() { throw \"task failed\"; }\n\
         let t = spawn(fail);\n\
         try { join(t); } catch (e) { print(\"caught: \" + e); }",
    );
    assert_eq!(output, "caught: task failed\n");
}

#[test]
fn test_double_join_fails() {
    let output = run_output(
        "async fn ok() { return 1; }\n\
         let t = spawn(ok);\n\
         join(t);\n\
         try { join(t); } catch (e) { print(\"double\"); }",
    );
    assert_eq!(output, "double\n");
}

#[test]
fn test_await_is_join_sugar() {
    let output = run_output(
        "async fn compute() { return 21; }\n\
         let t = spawn(compute);\n\
         print(await t * 2);",
    );
    assert_eq!(output, "42\n");
}

#[test]
fn test_detached_task_cannot_be_joined() {
    let output = run_output(
        "async fn work() { return 1; }\n\
         let t = spawn(work);\n\
         detach(t);\n\
         try { join(t); } catch (e) { print(\"detached\"); }",
    );
    assert_eq!(output, "detached\n");
}

#[test]
fn test_spawn_rejects_raw_ptr_arguments() {
    let output = run_output(
        "async fn f(p) { return null; }\n\
         let p = alloc(8);\n\
         try { spawn(f, p); } catch (e) { print(\"rejected\"); }\n\
         free(p);",
    );
    assert_eq!(output, "rejected\n");
}

#[test]
fn test_channels_shared_by_reference_on_spawn() {
    // Channels are not deep-copied: the spawned task sends into the same
    // channel the spawner holds.
    let output = run_output(
        "async fn send_one(ch) { ch.send(7); return null; }\n\
         let ch = channel(1);\n\
         let t = spawn(send_one, ch);\n\
         print(ch.recv());\n\
         join(t);",
    );
    assert_eq!(output, "7\n");
}

#[test]
fn test_send_on_closed_channel_throws() {
    let output = run_output(
        "let ch = channel(1);\n\
         ch.close();\n\
         try { ch.send(1); } catch (e) { print(\"closed\"); }\n\
         print(ch.recv() == null);",
    );
    assert_eq!(output, "closed\ntrue\n");
}

#[test]
fn test_channel_capacity_must_be_positive() {
    let output = run_output("try { channel(0); } catch (e) { print(\"bad cap\"); }");
    assert_eq!(output, "bad cap\n");
}

#[test]
fn test_many_tasks() {
    let output = run_output(
        "async fn sq(n) { return n * n; }\n\
         let tasks = [];\n\
         for (let i = 0; i < 16; i++) { tasks.push(spawn(sq, i)); }\n\
         let total = 0;\n\
         for (t in tasks) { total = total + join(t); }\n\
         print(total);",
    );
    // sum of squares 0..15 = 1240
    assert_eq!(output, "1240\n");
}
