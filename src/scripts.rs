// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The atomic mutator programs.
//!
//! Every cache mutation is a Lua program run server-side against a single
//! key, so the unpack → mutate → repack → mark-dirty sequence commits in one
//! indivisible step. A program that finds no record under its key raises
//! `CACHE_MISS`, which the client maps to its internal miss sentinel and
//! answers with a load-and-retry.
//!
//! The dirty-structure discipline lives in [`MARK_DIRTY`]: membership is
//! added to the set first, and the queue is only pushed when the set add was
//! new. The set deduplicates; the queue preserves order. Every program that
//! commits a change runs the same snippet.

use std::sync::LazyLock;

use crate::script::Script;

/// Dirty-set key. Shared by every writer and synchronizer on the instance.
pub(crate) const DIRTY_SET: &str = "$DIRTY_SET$";
/// Dirty-queue key, newest at the head, consumed at the tail.
pub(crate) const DIRTY_QUE: &str = "$DIRTY_QUE$";

/// Add KEYS[1] to the dirty structures; the queue push is suppressed when the
/// key is already tracked.
const MARK_DIRTY: &str = r#"
if redis.call("SADD","$DIRTY_SET$",KEYS[1])>0 then
  redis.call("LPUSH","$DIRTY_QUE$",KEYS[1])
end"#;

/// KEYS = { key }, ARGV = { default? }
/// Returns the packed record; creates `rev=1, val=ARGV[1]` over a tombstone
/// when a default payload is supplied.
pub(crate) static GET: LazyLock<Script> = LazyLock::new(|| {
    Script::new(format!(
        r#"
local b=redis.call("GET",KEYS[1])
if not b then error("CACHE_MISS") end
local d=cmsgpack.unpack(b)
if d.rev==0 and ARGV[1] then
  d.rev,d.val=1,ARGV[1]
  b=cmsgpack.pack(d)
  redis.call("SET",KEYS[1],b){mark_dirty}
end
return b"#,
        mark_dirty = MARK_DIRTY,
    ))
});

/// KEYS = { key }, ARGV = { value }
/// Returns the new revision.
pub(crate) static SET: LazyLock<Script> = LazyLock::new(|| {
    Script::new(format!(
        r#"
local b=redis.call("GET",KEYS[1])
if not b then error("CACHE_MISS") end
local d=cmsgpack.unpack(b)
d.rev,d.val=d.rev+1,ARGV[1]
redis.call("SET",KEYS[1],cmsgpack.pack(d)){mark_dirty}
return d.rev"#,
        mark_dirty = MARK_DIRTY,
    ))
});

/// KEYS = { key }, ARGV = { value }
/// Returns 1 when the record was created, 0 when it already held a value.
pub(crate) static ADD: LazyLock<Script> = LazyLock::new(|| {
    Script::new(format!(
        r#"
local b=redis.call("GET",KEYS[1])
if not b then error("CACHE_MISS") end
local d=cmsgpack.unpack(b)
if d.rev~=0 then return 0 end
d.rev,d.val=1,ARGV[1]
redis.call("SET",KEYS[1],cmsgpack.pack(d)){mark_dirty}
return 1"#,
        mark_dirty = MARK_DIRTY,
    ))
});

/// KEYS = { key }, ARGV = { packed, ttl_secs }
/// Installs a record loaded from the document store, unless the cache
/// already holds a revision at least as new. The loaded record is volatile:
/// untouched negative results and cold data expire.
pub(crate) static LOAD: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local b=redis.call("GET",KEYS[1])
if not b or cmsgpack.unpack(b).rev<cmsgpack.unpack(ARGV[1]).rev then
  redis.call("SET",KEYS[1],ARGV[1],"EX",ARGV[2])
end
return 0"#
            .to_string(),
    )
});

const PEEK_SRC: &str = r#"
local k=redis.call("LINDEX","$DIRTY_QUE$",-1)
if not k then return end
local b=redis.call("GET",k)
if not b then
  redis.call("RPOP","$DIRTY_QUE$")
  redis.call("SREM","$DIRTY_SET$",k)
  return
end
return {k,b}"#;

/// KEYS = {}, ARGV = {}
/// Returns the oldest dirty `{key, packed}` pair, or nil when the queue is
/// drained. A queue entry whose record was evicted is cleaned up in passing.
pub(crate) static PEEK: LazyLock<Script> = LazyLock::new(|| Script::new(PEEK_SRC.to_string()));

/// KEYS = { key }, ARGV = { rev, ttl_secs }
/// Advances past a flushed record, then peeks the next.
///
/// The revision comparison is the writeback commit guard: only when the
/// cached revision still equals the flushed one is the key cleaned and made
/// volatile. A mismatch means a writer got in while the save was in
/// flight, so the entry is rotated to the queue head and stays dirty.
pub(crate) static NEXT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(format!(
        r#"
if redis.call("LINDEX","$DIRTY_QUE$",-1)==KEYS[1] then
  local b=redis.call("GET",KEYS[1])
  if not b then
    redis.call("RPOP","$DIRTY_QUE$")
    redis.call("SREM","$DIRTY_SET$",KEYS[1])
  else
    local d=cmsgpack.unpack(b)
    if tostring(d.rev)==ARGV[1] then
      redis.call("RPOP","$DIRTY_QUE$")
      redis.call("SREM","$DIRTY_SET$",KEYS[1])
      redis.call("EXPIRE",KEYS[1],ARGV[2])
    else
      redis.call("RPOPLPUSH","$DIRTY_QUE$","$DIRTY_QUE$")
    end
  end
end
{peek}"#,
        peek = PEEK_SRC,
    ))
});

/// Wrap a user program into the sandboxed mutator shell.
///
/// The shell unpacks the record, exposes its payload as the mutable `VALUE`
/// binding in a restricted environment, runs the program, and commits with a
/// revision bump only when `VALUE` actually changed. The program's return
/// value passes through untouched.
pub(crate) fn sandbox_source(body: &str) -> String {
    format!(
        r#"
local b=redis.call("GET",KEYS[1])
if not b then error("CACHE_MISS") end
local d=cmsgpack.unpack(b)
local f=assert(loadstring([[{body}]]))
local e={{}}
setmetatable(e,{{__index=_G}})
e.VALUE=d.val
setfenv(f,e)
local r=f()
if d.val~=e.VALUE then
  d.rev,d.val=d.rev+1,e.VALUE
  redis.call("SET",KEYS[1],cmsgpack.pack(d)){mark_dirty}
end
return r"#,
        body = body,
        mark_dirty = MARK_DIRTY,
    )
}

/// ARGV = { value, capacity, strategy } (strategy 1 = ring)
/// Returns the assigned id, or -1 when the mailbox is full and rejecting.
pub(crate) static MB_PUSH: LazyLock<Script> = LazyLock::new(|| {
    Script::new(sandbox_source(
        r#"
local d={seq=0,que={}}
if #VALUE>0 then d=cmsgpack.unpack(VALUE) end
local cap=tonumber(ARGV[2])
if cap>0 and #d.que>=cap then
  if tonumber(ARGV[3])==1 then
    while #d.que>=cap do table.remove(d.que,1) end
  else
    return -1
  end
end
d.seq=d.seq+1
d.que[#d.que+1]={id=d.seq,val=ARGV[1]}
VALUE=cmsgpack.pack(d)
return d.seq"#,
    ))
});

/// ARGV = { id... } ascending.
/// Returns the ids actually removed; ids not present are skipped.
/// The queue is ordered by id, so each id is found by binary search with the
/// lower bound carried forward across the sorted ARGV.
pub(crate) static MB_PULL: LazyLock<Script> = LazyLock::new(|| {
    Script::new(sandbox_source(
        r#"
local d={seq=0,que={}}
if #VALUE>0 then d=cmsgpack.unpack(VALUE) end
local i,n,r=1,#d.que,{}
for _,a in ipairs(ARGV) do
  local j,v=#d.que,tonumber(a)
  while i<=j do
    local k=math.floor((i+j)/2)
    if d.que[k].id<v then
      i=k+1
    elseif d.que[k].id>v then
      j=k-1
    else
      r[#r+1]=d.que[k].id
      table.remove(d.que,k)
      break
    end
  end
end
if #d.que~=n then VALUE=cmsgpack.pack(d) end
return r"#,
    ))
});

/// ARGV = {}.
/// Empties the queue, preserving the sequence. Returns the purged count.
pub(crate) static MB_CLEAN: LazyLock<Script> = LazyLock::new(|| {
    Script::new(sandbox_source(
        r#"
local d={seq=0,que={}}
if #VALUE>0 then d=cmsgpack.unpack(VALUE) end
if #d.que>0 then VALUE=cmsgpack.pack({seq=d.seq,que={}}) end
return #d.que"#,
    ))
});

/// Every bundled program, for eager registration at startup.
pub(crate) fn all() -> [&'static Script; 9] {
    [&GET, &SET, &ADD, &LOAD, &PEEK, &NEXT, &MB_PUSH, &MB_PULL, &MB_CLEAN]
}
