//! Runnable scenarios exercising `race`, grounded one-for-one on
//! `examples/original_source/examples/*.py`: a basic multi-worker race,
//! callback chaining, cookie persistence, template evaluation, and
//! fake-send debugging. Demonstration code, not part of the engine.
//!
//!   cargo run -p race_demo -- basic
//!   cargo run -p race_demo -- callbacks
//!   cargo run -p race_demo -- cookies
//!   cargo run -p race_demo -- eval
//!   cargo run -p race_demo -- fake_send
//!   cargo run -p race_demo -- timing [worker_count] [iterations]

use std::time::{Duration, Instant};

use race::{
    Body, ConnectMode, OrderedMultimap, ProcessOptions, Race, RequestSpec, TemplateOptions,
    WorkItem,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let scenario = args.get(1).map(String::as_str).unwrap_or("basic");

    match scenario {
        "basic" => scenario_basic(),
        "callbacks" => scenario_callbacks(),
        "cookies" => scenario_cookies(),
        "eval" => scenario_eval(),
        "fake_send" => scenario_fake_send(),
        "timing" => scenario_timing(&args[2..]),
        other => eprintln!(
            "unknown scenario {other:?}; try basic|callbacks|cookies|eval|fake_send|timing"
        ),
    }
}

/// `basic.py`: three workers race one GET, printing each worker's view of
/// the server's clock.
fn scenario_basic() {
    let request = RequestSpec::get("https://now.httpbin.org");
    let queue = vec![WorkItem::Request(request)];

    let workers = Race::new().process(queue, 3);
    for (index, worker) in workers.iter().enumerate() {
        match worker.response().as_deref() {
            Some(Ok(response)) => match response.json() {
                Ok(json) => println!("worker {index}: now.epoch = {}", json["now"]["epoch"]),
                Err(error) => println!("worker {index}: non-JSON body ({error})"),
            },
            Some(Err(error)) => println!("worker {index}: error: {error}"),
            None => println!("worker {index}: no response"),
        }
    }
}

/// `callbacks.py`: fetch some random bytes, then a callback mocks
/// extracting a CSRF token from the response and enqueues a follow-up
/// login POST built from it.
fn scenario_callbacks() {
    let token_request = RequestSpec::get("https://httpbin.org/bytes/16");

    let queue = vec![
        WorkItem::Request(token_request),
        WorkItem::callback(|state| {
            let Some(Ok(response)) = state.response().map(|r| r.as_ref()) else {
                log::warn!(
                    "worker {}: no token response to extract from",
                    state.worker_index
                );
                return;
            };
            let csrf_token = hex_encode(&response.body);

            let mut form = OrderedMultimap::new();
            form.insert("user".to_string(), "pyrace".to_string());
            form.insert("pass".to_string(), "root".to_string());
            form.insert("token".to_string(), csrf_token);

            let mut login = RequestSpec::get("https://httpbin.org/post");
            login.method = "POST".to_string();
            login.body = Some(Body::Form(form));
            state.queue.push_back(WorkItem::Request(login));
        }),
    ];

    let workers = Race::new().process(queue, 3);
    for (index, worker) in workers.iter().enumerate() {
        match worker.response().as_deref() {
            Some(Ok(response)) => match response.json() {
                Ok(json) => println!("worker {index}: form = {}", json["form"]),
                Err(error) => println!("worker {index}: non-JSON body ({error})"),
            },
            Some(Err(error)) => println!("worker {index}: error: {error}"),
            None => println!("worker {index}: no response"),
        }
    }
}

/// `cookies.py`: one worker has the server set a cookie, manually sends
/// another, then lists what the session actually holds — once with
/// `save_sent_cookies` on, once off.
fn scenario_cookies() {
    for &save_sent_cookies in &[true, false] {
        println!("===== save_sent_cookies: {save_sent_cookies} =====");

        let server_set =
            RequestSpec::get("https://httpbin.org/cookies/set?server_set=this_cookie");

        let mut manual = RequestSpec::get("https://httpbin.org/cookies");
        manual
            .cookies
            .insert("we_sent".to_string(), "this_one".to_string());

        let list_cookies = RequestSpec::get("https://httpbin.org/cookies");

        let queue = vec![
            WorkItem::Request(server_set),
            WorkItem::Request(manual),
            WorkItem::Request(list_cookies),
        ];

        let options = ProcessOptions {
            worker_count: 1,
            save_sent_cookies,
            ..ProcessOptions::default()
        };
        let workers = Race::new().process(queue, options);

        let all_responses = workers[0].all_responses();
        for (step, label) in ["server cookie", "manual cookie", "result cookie"]
            .iter()
            .enumerate()
        {
            match all_responses.get(step).map(|r| r.as_ref()) {
                Some(Ok(response)) => match response.json() {
                    Ok(json) => println!("{label}: {}", json["cookies"]),
                    Err(error) => println!("{label}: non-JSON body ({error})"),
                },
                Some(Err(error)) => println!("{label}: error: {error}"),
                None => println!("{label}: no response"),
            }
        }
        println!();
    }
}

/// `eval.py`: the same request body, evaluated with `do_eval` off then on,
/// showing `<<< self.worker_index >>>` and `<<< random.float() >>>`
/// resolve only when evaluation is enabled.
fn scenario_eval() {
    for &do_eval in &[false, true] {
        println!("===== do_eval: {do_eval} =====");

        let mut form = OrderedMultimap::new();
        form.insert(
            "worker".to_string(),
            "<<<self.worker_index>>>".to_string(),
        );
        form.insert("rand".to_string(), "<<<random.float()>>>".to_string());

        let mut request = RequestSpec::get("https://httpbin.org/post");
        request.method = "POST".to_string();
        request.body = Some(Body::Form(form));
        let queue = vec![WorkItem::Request(request)];

        let options = ProcessOptions {
            worker_count: 3,
            do_eval,
            template_options: TemplateOptions::default(),
            ..ProcessOptions::default()
        };
        let workers = Race::new().process(queue, options);

        for (index, worker) in workers.iter().enumerate() {
            match worker.response().as_deref() {
                Some(Ok(response)) => match response.json() {
                    Ok(json) => println!("worker {index}: form = {}", json["form"]),
                    Err(error) => println!("worker {index}: non-JSON body ({error})"),
                },
                Some(Err(error)) => println!("worker {index}: error: {error}"),
                None => println!("worker {index}: no response"),
            }
        }
        println!();
    }
}

/// `fake_send.py`: requests with templated fields that are never actually
/// sent, demonstrating how to debug what a worker would have sent.
fn scenario_fake_send() {
    let mut request = RequestSpec::get(
        "https://request_never_sent/<<<[\"A\",\"B\"][self.worker_index % 2]>>>",
    );
    request
        .headers
        .insert("X-Rand".to_string(), "<<<random.float()>>>".to_string());
    request
        .cookies
        .insert("time".to_string(), "<<<time.unix()>>>".to_string());

    let queue = vec![WorkItem::Request(request)];
    let options = ProcessOptions {
        worker_count: 4,
        do_eval: true,
        fake_send: true,
        ..ProcessOptions::default()
    };
    let workers = Race::new().process(queue, options);

    for (index, worker) in workers.iter().enumerate() {
        let Some(Ok(response)) = worker.response().as_deref().map(|r| r) else {
            println!("worker {index}: no fake response");
            continue;
        };
        // `response.request` is the prepared form: session-merged headers
        // and a jar-rendered `Cookie:` header, not the raw per-request spec.
        let prepared = &response.request;
        let x_rand = prepared
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("x-rand"))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let cookie = prepared
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        println!("worker {index}:");
        println!("  target: {}", prepared.target);
        println!("  X-Rand: {x_rand}");
        println!("  cookie: {cookie}");
    }
}

/// `timing.py`, trimmed to one iteration count passed on the command line:
/// races the same request across N workers and reports how far apart each
/// worker's view of the server clock landed.
fn scenario_timing(args: &[String]) {
    let worker_count: usize = args.first().and_then(|s| s.parse().ok()).unwrap_or(4);
    let iterations: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);

    println!("worker_count: {worker_count}");
    println!("iterations:   {iterations}");
    println!();

    let request = RequestSpec::get("https://now.httpbin.org");
    let queue = vec![WorkItem::Request(request); iterations];

    let options = ProcessOptions {
        worker_count,
        connect_mode: ConnectMode::Same,
        send_delay: Duration::from_millis(100),
        ..ProcessOptions::default()
    };

    let started = Instant::now();
    let workers = Race::new().process(queue, options);
    let elapsed = started.elapsed();

    let mut epochs = Vec::new();
    for worker in &workers {
        for response in worker.all_responses() {
            if let Ok(response) = response.as_ref() {
                if let Ok(json) = response.json() {
                    if let Some(epoch) = json["now"]["epoch"].as_f64() {
                        epochs.push(epoch);
                    }
                }
            }
        }
    }
    epochs.sort_by(|a, b| a.partial_cmp(b).unwrap());

    if let (Some(&first), Some(&last)) = (epochs.first(), epochs.last()) {
        println!(
            "spread across {} sample(s): {:.4}s",
            epochs.len(),
            last - first
        );
    }
    println!("wall time: {:.3}s", elapsed.as_secs_f64());
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
