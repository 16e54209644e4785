// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![cfg(any(target_os = "android", target_os = "linux"))]

use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::Duration;

use uring_core::bindings::io_uring_sqe;
use uring_core::bindings::IORING_ENTER_GETEVENTS;
use uring_core::bindings::IORING_SETUP_ATTACH_WQ;
use uring_core::bindings::IORING_SETUP_SQPOLL;
use uring_core::Errno;
use uring_core::Error;
use uring_core::Event;
use uring_core::Opcode;
use uring_core::Ring;
use uring_core::RingParams;
use uring_core::UserData;

#[test]
fn nop_user_data_round_trip() {
    let mut ring = Ring::new(16).unwrap();
    ring.add_nop(0xdead_beef_cafe).unwrap();
    assert_eq!(ring.submit().unwrap(), 1);
    assert_eq!(ring.enter(0, 1, IORING_ENTER_GETEVENTS).unwrap(), 0);
    let (user_data, res) = ring.wait().unwrap().next().unwrap();
    assert_eq!(user_data, 0xdead_beef_cafe as UserData);
    assert_eq!(res.unwrap(), 0);
}

#[test]
fn poll_completion_reports_error_result() {
    let mut ring = Ring::new(16).unwrap();
    // Removing a poll that was never added completes with -ENOENT, which
    // must surface as an io::Error, not a swallowed code.
    let sqe = io_uring_sqe {
        opcode: Opcode::PollRemove.into(),
        fd: -1,
        addr: 123,
        user_data: 7,
        ..Default::default()
    };
    // SAFETY: the entry references no memory.
    unsafe { ring.push(&sqe).unwrap() };
    let (user_data, res) = ring.wait().unwrap().next().unwrap();
    assert_eq!(user_data, 7);
    let err = res.unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn eventfd_write_unblocks_wait() {
    let mut ring = Ring::new(16).unwrap();
    let evt = Event::new().unwrap();
    ring.add_poll_fd(evt.as_raw_fd(), libc::POLLIN as u16, 99)
        .unwrap();

    let evt_fd = evt.as_raw_fd();
    let signaler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        // SAFETY: writing 8 bytes to an eventfd owned by the main thread,
        // which outlives this one.
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                evt_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        assert_eq!(ret, 8);
    });

    // Blocks in io_uring_enter until the other thread signals the eventfd.
    let (user_data, res) = ring.wait().unwrap().next().unwrap();
    assert_eq!(user_data, 99);
    assert!(res.unwrap() & libc::POLLIN as u32 != 0);
    signaler.join().unwrap();
    assert_eq!(evt.read().unwrap(), 1);
}

#[test]
fn teardown_after_drain_leaves_fd_closed() {
    let mut ring = Ring::new(8).unwrap();
    for i in 0..4u64 {
        ring.add_nop(i).unwrap();
    }
    let mut drained = 0;
    while drained < 4 {
        drained += ring.wait().unwrap().count();
    }
    let fd = ring.as_raw_fd();
    drop(ring);
    // SAFETY: fcntl with F_GETFD touches no memory.
    let ret = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    assert_eq!(ret, -1);
    assert_eq!(Errno::last().errno(), libc::EBADF);
}

#[test]
fn attach_to_existing_workqueue() {
    let first = Ring::new(8).unwrap();
    let params = RingParams {
        flags: IORING_SETUP_ATTACH_WQ,
        wq_fd: first.as_raw_fd(),
        ..RingParams::new(8)
    };
    match Ring::with_params(&params) {
        Ok(mut second) => {
            second.add_nop(1).unwrap();
            let (user_data, res) = second.wait().unwrap().next().unwrap();
            assert_eq!(user_data, 1);
            assert_eq!(res.unwrap(), 0);
        }
        // Kernels before 5.6 don't know ATTACH_WQ.
        Err(Error::Setup(e)) => assert_eq!(e.errno(), libc::EINVAL),
        Err(other) => panic!("unexpected error: {}", other),
    }
}

#[test]
fn sqpoll_wait_wakes_idle_kernel_thread() {
    let params = RingParams {
        flags: IORING_SETUP_SQPOLL,
        sq_thread_idle: 1,
        ..RingParams::new(8)
    };
    let mut ring = match Ring::with_params(&params) {
        Ok(r) => r,
        // Sq-poll needs a 5.11+ kernel or CAP_SYS_NICE.
        Err(Error::Setup(_)) => return,
        Err(other) => panic!("unexpected error: {}", other),
    };
    // Let the kernel thread park itself before anything is published, so the
    // entry below is only consumed if the wait path raises the wakeup flag.
    thread::sleep(Duration::from_millis(20));
    ring.add_nop(3).unwrap();
    let (user_data, res) = ring.wait().unwrap().next().unwrap();
    assert_eq!(user_data, 3);
    assert_eq!(res.unwrap(), 0);
}

extern "C" fn noop_signal_handler(_: libc::c_int) {}

fn install_nonrestarting_usr1_handler() {
    // SAFETY: the handler block is zeroed then fully initialized, and the
    // handler itself touches nothing.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = noop_signal_handler as libc::sighandler_t;
        // No SA_RESTART: a caught signal must surface as EINTR.
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        assert_eq!(
            libc::sigaction(libc::SIGUSR1, &sa, std::ptr::null_mut()),
            0
        );
    }
}

// Pesters `target` with SIGUSR1 for a while, then runs `finish` to let the
// blocked call complete normally.
fn spawn_interrupter<F>(target: libc::pthread_t, finish: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(5));
            // SAFETY: the target thread outlives this one; it joins us.
            unsafe {
                libc::pthread_kill(target, libc::SIGUSR1);
            }
        }
        finish();
    })
}

#[test]
fn interrupted_wait_returns_normal_result() {
    install_nonrestarting_usr1_handler();
    let mut ring = Ring::new(16).unwrap();
    let evt = Event::new().unwrap();
    ring.add_poll_fd(evt.as_raw_fd(), libc::POLLIN as u16, 11)
        .unwrap();
    assert_eq!(ring.submit().unwrap(), 1);

    let evt_fd = evt.as_raw_fd();
    // SAFETY: trivially safe.
    let waiter = unsafe { libc::pthread_self() };
    let interrupter = spawn_interrupter(waiter, move || {
        let val: u64 = 1;
        // SAFETY: writing 8 bytes to an eventfd the joining thread owns.
        let ret = unsafe {
            libc::write(
                evt_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        assert_eq!(ret, 8);
    });

    // The signals land while this blocks in io_uring_enter; the interruptions
    // must never leak out as errors.
    let (user_data, res) = ring.wait().unwrap().next().unwrap();
    assert_eq!(user_data, 11);
    assert!(res.unwrap() & libc::POLLIN as u32 != 0);
    interrupter.join().unwrap();
}

#[test]
fn interrupted_event_read_returns_normal_result() {
    install_nonrestarting_usr1_handler();
    let evt = Event::new().unwrap();
    let evt_fd = evt.as_raw_fd();
    // SAFETY: trivially safe.
    let reader = unsafe { libc::pthread_self() };
    let interrupter = spawn_interrupter(reader, move || {
        let val: u64 = 42;
        // SAFETY: writing 8 bytes to an eventfd the joining thread owns.
        let ret = unsafe {
            libc::write(
                evt_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        assert_eq!(ret, 8);
    });

    assert_eq!(evt.read().unwrap(), 42);
    interrupter.join().unwrap();
}

#[test]
fn views_are_consistent_with_handle() {
    let ring = Ring::new(16).unwrap();
    let sq = ring.sq_view();
    let cq = ring.cq_view();
    assert_eq!(sq.ring_fd, ring.as_raw_fd());
    assert_eq!(cq.ring_fd, ring.as_raw_fd());
    assert_eq!(sq.ring_mask, sq.ring_entries - 1);
    assert_eq!(cq.ring_mask, cq.ring_entries - 1);
    assert!(!sq.sqes.is_null());
    assert!(!cq.cqes.is_null());
    // The published indices start out equal on a fresh ring.
    // SAFETY: the view pointers are valid while `ring` lives.
    unsafe {
        assert_eq!(
            std::ptr::read_volatile(sq.head),
            std::ptr::read_volatile(sq.tail)
        );
        assert_eq!(
            std::ptr::read_volatile(cq.head),
            std::ptr::read_volatile(cq.tail)
        );
    }
}

#[test]
fn many_rings_create_and_drop() {
    // Exhausting neither fds nor mappings across repeated lifecycles.
    for _ in 0..64 {
        let mut ring = Ring::new(4).unwrap();
        ring.add_nop(0).unwrap();
        let (_, res) = ring.wait().unwrap().next().unwrap();
        assert_eq!(res.unwrap(), 0);
    }
}
